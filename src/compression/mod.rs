
//! Contains the compression attribute definition
//! and methods to compress and decompress tile payloads.


// private modules make non-breaking changes easier
mod deflate;
mod lzw;
mod rle;

use std::fmt;

use crate::error::{Error, Result};

/// A byte vector.
pub type ByteVec = Vec<u8>;

/// A byte slice.
pub type Bytes<'s> = &'s [u8];

/// Specifies which compression method is applied to every tile of a layer.
/// Use uncompressed tiles for fastest loading and writing speeds.
/// Use rle compression for fast loading and writing with slight memory savings.
/// Use deflate compression for slow processing with large memory savings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {

    /// Store uncompressed tile bytes.
    /// Produces large files that can be read and written very quickly.
    None,

    /// Raw rfc 1951 deflate streams, without a zlib or gzip wrapper.
    /// Slowly produces small tiles which can be read with moderate speed.
    /// Legacy datasets occasionally carry gzip-wrapped payloads under
    /// this tag; those are detected by their magic bytes and unwrapped.
    Deflate,

    /// Variable-bit lzw with least-significant-bit-first packing,
    /// as used by the gif family of formats.
    LzwLsb,

    /// Variable-bit lzw with most-significant-bit-first packing and the
    /// early code size switch, as used by the tiff family of formats.
    LzwMsb,

    /// Byte-oriented run length encoding.
    /// Produces slightly smaller tiles that can still be read
    /// and written rather quickly. Works best for payloads
    /// with large runs of identical bytes, such as masks.
    Rle8,
}

impl fmt::Display for Compression {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} compression", match self {
            Compression::None => "no",
            Compression::Deflate => "deflate",
            Compression::LzwLsb => "lzw (lsb)",
            Compression::LzwMsb => "lzw (msb)",
            Compression::Rle8 => "rle8",
        })
    }
}

impl Compression {

    /// The on-disk compression tag.
    pub fn to_tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Deflate => 1,
            Compression::LzwLsb => 2,
            Compression::LzwMsb => 3,
            Compression::Rle8 => 4,
        }
    }

    /// Interpret an on-disk compression tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Deflate),
            2 => Ok(Compression::LzwLsb),
            3 => Ok(Compression::LzwMsb),
            4 => Ok(Compression::Rle8),
            _ => Err(Error::unsupported("unknown compression tag")),
        }
    }

    /// Compress one tile payload.
    /// The returned bytes are exactly what is stored in the file.
    pub fn compress(self, uncompressed: ByteVec) -> Result<ByteVec> {
        match self {
            Compression::None => Ok(uncompressed),
            Compression::Deflate => deflate::compress_bytes(&uncompressed),
            Compression::LzwLsb => lzw::compress_bytes_lsb(&uncompressed),
            Compression::LzwMsb => lzw::compress_bytes_msb(&uncompressed),
            Compression::Rle8 => rle::compress_bytes(&uncompressed),
        }
    }

    /// Decompress one tile payload,
    /// restoring exactly `expected_byte_size` uncompressed bytes.
    pub fn decompress(self, compressed: ByteVec, expected_byte_size: usize) -> Result<ByteVec> {
        let bytes = match self {
            Compression::None => {
                if compressed.len() != expected_byte_size {
                    return Err(Error::codec("uncompressed tile has a wrong byte count"));
                }

                compressed
            },

            Compression::Deflate => deflate::decompress_bytes(&compressed)?,
            Compression::LzwLsb => lzw::decompress_bytes_lsb(&compressed)?,
            Compression::LzwMsb => lzw::decompress_bytes_msb(&compressed)?,
            Compression::Rle8 => rle::decompress_bytes(&compressed, expected_byte_size)?,
        };

        if bytes.len() != expected_byte_size {
            return Err(Error::codec("decompressed tile has a wrong byte count"));
        }

        Ok(bytes)
    }
}
