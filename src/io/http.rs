
//! Read a pixi file over http without downloading it entirely.
//!
//! The server must answer a `HEAD` request with the resource size and
//! `Accept-Ranges: bytes`. Every read is then satisfied by a `GET` with
//! a `Range: bytes=position-(size-1)` header, streaming from the
//! current position towards the end of the resource. Seeking drops the
//! streaming response, so the next read opens a fresh range.
//!
//! Writing over http is not supported: this source implements
//! `Read + Seek` but deliberately not `Write`.

use std::io;

use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;

use crate::error::{Error, IoResult, Result};
use crate::io::{Read, Seek, SeekFrom};

/// A seekable byte source backed by http byte-range requests.
#[derive(Debug)]
pub struct HttpSource {
    client: Client,
    url: String,
    size: u64,
    position: u64,
    response: Option<Response>,
}

impl HttpSource {

    /// Issue a `HEAD` request to discover the resource size and verify
    /// that the server accepts byte-range requests. No content bytes
    /// are downloaded.
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::builder().build().map_err(request_error)?;
        let head = client.head(url).send().map_err(request_error)?;

        if !head.status().is_success() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("http head request failed with status {}", head.status()),
            )));
        }

        let accepts_ranges = head.headers().get(ACCEPT_RANGES)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |value| value.eq_ignore_ascii_case("bytes"));

        if !accepts_ranges {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "http server does not advertise `Accept-Ranges: bytes`",
            )));
        }

        let size = head.headers().get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| Error::format("http head response lacks a content length"))?;

        tracing::debug!(url, size, "connected to ranged http source");

        Ok(HttpSource { client, url: url.to_owned(), size, position: 0, response: None })
    }

    /// The total size of the remote resource in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The url this source reads from.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn open_range(&mut self) -> IoResult<&mut Response> {
        if self.response.is_none() {
            let range = format!("bytes={}-{}", self.position, self.size - 1);
            tracing::debug!(url = self.url.as_str(), range = range.as_str(), "http range request");

            let response = self.client.get(&self.url)
                .header(RANGE, range)
                .send()
                .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;

            if response.status() != StatusCode::PARTIAL_CONTENT {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("http server returned status {} instead of 206", response.status()),
                ));
            }

            self.response = Some(response);
        }

        Ok(self.response.as_mut().expect("range response was just inserted"))
    }
}

fn request_error(error: reqwest::Error) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, error))
}

impl Read for HttpSource {
    fn read(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        if buffer.is_empty() || self.position >= self.size {
            return Ok(0);
        }

        let count = self.open_range()?.read(buffer)?;

        if count == 0 {
            // the server ended the stream before the requested range was complete
            self.response = None;
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "http range response ended early",
            ));
        }

        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for HttpSource {
    fn seek(&mut self, target: SeekFrom) -> IoResult<u64> {
        let position = match target {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => checked_add_signed(self.size, delta),
            SeekFrom::Current(delta) => checked_add_signed(self.position, delta),
        };

        let position = position.ok_or_else(|| io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek to a negative or overflowing position",
        ))?;

        if position != self.position {
            self.position = position;
            self.response = None; // the open range no longer starts at the right byte
        }

        Ok(self.position)
    }
}

fn checked_add_signed(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 { base.checked_add(delta as u64) }
    else { base.checked_sub(delta.unsigned_abs()) }
}
