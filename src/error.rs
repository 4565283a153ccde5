
//! Error type definitions and the result aliases
//! used throughout the crate.

use std::borrow::Cow;
use std::convert::TryFrom;
use std::error;
use std::fmt;

/// A result that, if ok, contains nothing, and otherwise contains a pixi error.
pub type UnitResult = Result<()>;

/// A result that may contain a pixi error.
pub type Result<T> = std::result::Result<T, Error>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;

/// An error that may happen while reading or writing a pixi file.
/// Distinguishes between causes so that callers can react
/// to malformed files differently than to transport failures.
#[derive(Debug)]
pub enum Error {

    /// The file bytes do not form a valid pixi file:
    /// bad magic number, unknown version, invalid offset width,
    /// a malformed section chain, or a truncated file.
    Format(Cow<'static, str>),

    /// The file is valid, but uses features
    /// which this implementation does not support,
    /// for example an unknown compression tag or field type.
    Unsupported(Cow<'static, str>),

    /// The underlying byte stream could not be read, written, or seeked.
    /// Also raised for http transports that reject a range request.
    Io(IoError),

    /// A tile payload could not be compressed or decompressed.
    Codec(Cow<'static, str>),

    /// A coordinate lies outside the logical volume of a layer.
    Bounds(Cow<'static, str>),

    /// The caller violated an api contract,
    /// for example appending tags to a read-only source
    /// or writing to an already-finalized tile slot.
    Usage(Cow<'static, str>),
}

impl Error {

    /// Create a format error with the specified message.
    pub fn format(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Format(message.into())
    }

    /// Create an unsupported-feature error with the specified message.
    pub fn unsupported(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Unsupported(message.into())
    }

    /// Create a codec error with the specified message.
    pub fn codec(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Codec(message.into())
    }

    /// Create a bounds error with the specified message.
    pub fn bounds(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Bounds(message.into())
    }

    /// Create a usage error with the specified message.
    pub fn usage(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Usage(message.into())
    }
}

/// Enable using the `?` operator on `io::Result`.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::format("reference to missing bytes")
        }
        else {
            Error::Io(error)
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(io_error) => Some(io_error),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Format(message) => write!(formatter, "invalid pixi file: {}", message),
            Error::Unsupported(message) => write!(formatter, "unsupported: {}", message),
            Error::Io(error) => write!(formatter, "io error: {}", error),
            Error::Codec(message) => write!(formatter, "tile codec error: {}", message),
            Error::Bounds(message) => write!(formatter, "out of bounds: {}", message),
            Error::Usage(message) => write!(formatter, "invalid usage: {}", message),
        }
    }
}

/// Panics on overflow in debug mode.
pub(crate) fn u64_to_usize(value: u64) -> usize {
    usize::try_from(value).expect("(u64 as usize) overflowed")
}

/// Panics on overflow in debug mode.
pub(crate) fn usize_to_u64(value: usize) -> u64 {
    u64::try_from(value).expect("(usize as u64) overflowed")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unexpected_eof_is_a_format_error() {
        let eof = IoError::new(std::io::ErrorKind::UnexpectedEof, "eof");
        match Error::from(eof) {
            Error::Format(_) => {},
            other => panic!("expected a format error, got {:?}", other),
        }
    }

    #[test]
    fn other_io_errors_stay_io_errors() {
        let refused = IoError::new(std::io::ErrorKind::ConnectionRefused, "refused");
        match Error::from(refused) {
            Error::Io(_) => {},
            other => panic!("expected an io error, got {:?}", other),
        }
    }
}
