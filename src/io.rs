
//! Seekable byte sources and destinations.
//!
//! A pixi file can live on the local file system or behind an http
//! server that supports byte-range requests. Reading always happens
//! through some `Read + Seek` stream; writing requires a local stream.

#[cfg(feature = "http")]
pub mod http;

pub use std::io::{Read, Seek, SeekFrom, Write};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{IoResult, Result};

/// Any byte source a pixi file can be read from.
pub trait SeekableRead: Read + Seek {}
impl<T: Read + Seek> SeekableRead for T {}

/// Open the stream behind a file path or an `http(s)://` url.
/// The result is buffered; every seek drops the buffer.
pub fn open_address(address: &str) -> Result<BufReader<Box<dyn SeekableRead>>> {
    if is_url(address) {
        #[cfg(feature = "http")] {
            let source = self::http::HttpSource::connect(address)?;
            return Ok(BufReader::new(Box::new(source) as Box<dyn SeekableRead>));
        }

        #[cfg(not(feature = "http"))] {
            return Err(crate::error::Error::unsupported(
                "http addresses require the `http` cargo feature"
            ));
        }
    }

    let file = File::open(Path::new(address))?;
    Ok(BufReader::new(Box::new(file) as Box<dyn SeekableRead>))
}

/// Whether an address names a remote resource instead of a local path.
pub fn is_url(address: &str) -> bool {
    address.starts_with("http://") || address.starts_with("https://")
}

/// Keep track of both the byte position in the inner stream
/// and only seek when the position actually changes.
/// All format codecs read and write through this wrapper,
/// so that section chains can record and patch absolute positions.
#[derive(Debug)]
pub struct Tracking<T> {
    inner: T,
    position: u64,
}

impl<T: Seek> Tracking<T> {

    /// Wrap a stream, remembering its current position.
    pub fn new(mut inner: T) -> IoResult<Self> {
        let position = inner.stream_position()?;
        Ok(Tracking { inner, position })
    }

    /// The current absolute byte position.
    pub fn byte_position(&self) -> u64 {
        self.position
    }

    /// Move to an absolute byte position.
    /// Does nothing if the stream is already there.
    pub fn seek_to(&mut self, position: u64) -> IoResult<()> {
        if position != self.position {
            self.inner.seek(SeekFrom::Start(position))?;
            self.position = position;
        }

        Ok(())
    }

    /// Move to the end of the stream and return that position.
    pub fn seek_to_end(&mut self) -> IoResult<u64> {
        self.position = self.inner.seek(SeekFrom::End(0))?;
        Ok(self.position)
    }

    /// Recover the wrapped stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Seek> Read for Tracking<T> {
    fn read(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        let count = self.inner.read(buffer)?;
        self.position += count as u64;
        Ok(count)
    }
}

impl<T: Write + Seek> Write for Tracking<T> {
    fn write(&mut self, buffer: &[u8]) -> IoResult<usize> {
        let count = self.inner.write(buffer)?;
        self.position += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.inner.flush()
    }
}
