
//! Read and write fixed-width integers, floats, offsets and strings
//! with the byte order and offset width declared in a pixi file header.
//!
//! Unlike formats with a fixed endianness, every multi-byte value in a
//! pixi file obeys the `byte_order` byte of the enclosing header, and
//! every file position obeys its `offset_size` byte. The pair of both
//! is an [`Encoding`], which is threaded through all format codecs.

use lebe::io::{ReadEndian, ReadPrimitive, WriteEndian};

use crate::error::{Error, IoResult, Result, UnitResult};
use crate::io::{Read, Write};

/// Strings longer than this are considered evidence of a corrupt file
/// rather than read into memory.
const MAX_STRING_BYTES: u64 = 1 << 24;

/// The byte order of all multi-byte integers and floats in a pixi file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {

    /// Most significant byte first.
    BigEndian,

    /// Least significant byte first.
    LittleEndian,
}

/// The width of every file position persisted in a pixi file.
/// Four-byte files are limited to 4 GiB of addressable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffsetSize {

    /// Offsets are stored as `u32`.
    Four,

    /// Offsets are stored as `u64`.
    Eight,
}

/// The combination of byte order and offset width
/// that governs one whole pixi file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {

    /// Byte order of all multi-byte values.
    pub byte_order: ByteOrder,

    /// Width of all persisted file positions.
    pub offset_size: OffsetSize,
}

impl ByteOrder {

    /// The header byte representing this byte order.
    pub fn to_byte(self) -> u8 {
        match self {
            ByteOrder::BigEndian => 0,
            ByteOrder::LittleEndian => 1,
        }
    }

    /// Interpret a header byte as a byte order.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(ByteOrder::BigEndian),
            1 => Ok(ByteOrder::LittleEndian),
            _ => Err(Error::format("invalid byte order")),
        }
    }

    /// Read one primitive value in this byte order.
    #[inline]
    pub fn read<R: Read + ReadEndian<T>, T: ReadPrimitive<R>>(self, read: &mut R) -> IoResult<T> {
        match self {
            ByteOrder::BigEndian => T::read_from_big_endian(read),
            ByteOrder::LittleEndian => T::read_from_little_endian(read),
        }
    }

    /// Write one primitive value, or a slice of primitive values,
    /// in this byte order.
    #[inline]
    pub fn write<T: ?Sized>(self, write: &mut impl WriteEndian<T>, value: &T) -> IoResult<()> {
        match self {
            ByteOrder::BigEndian => write.write_as_big_endian(value),
            ByteOrder::LittleEndian => write.write_as_little_endian(value),
        }
    }

    /// Read a slice of primitive values in this byte order.
    #[inline]
    pub fn read_slice<T: ?Sized>(self, read: &mut impl ReadEndian<T>, slice: &mut T) -> IoResult<()> {
        match self {
            ByteOrder::BigEndian => read.read_from_big_endian_into(slice),
            ByteOrder::LittleEndian => read.read_from_little_endian_into(slice),
        }
    }
}

impl OffsetSize {

    /// The header byte representing this offset width.
    /// Identical to the number of bytes per offset.
    pub fn to_byte(self) -> u8 {
        match self {
            OffsetSize::Four => 4,
            OffsetSize::Eight => 8,
        }
    }

    /// Interpret a header byte as an offset width.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            4 => Ok(OffsetSize::Four),
            8 => Ok(OffsetSize::Eight),
            _ => Err(Error::format("invalid offset width")),
        }
    }

    /// How many bytes one offset occupies on disk.
    pub fn byte_count(self) -> usize {
        self.to_byte() as usize
    }

    /// The largest file position this width can express.
    pub fn max_offset(self) -> u64 {
        match self {
            OffsetSize::Four => u64::from(u32::MAX),
            OffsetSize::Eight => u64::MAX,
        }
    }
}

impl Encoding {

    /// Create an encoding from the two header bytes.
    pub fn new(byte_order: ByteOrder, offset_size: OffsetSize) -> Self {
        Encoding { byte_order, offset_size }
    }

    /// Read one file position or unsigned count at the declared width.
    pub fn read_offset(self, read: &mut impl Read) -> Result<u64> {
        match self.offset_size {
            OffsetSize::Four => Ok(u64::from(self.byte_order.read::<_, u32>(read)?)),
            OffsetSize::Eight => Ok(self.byte_order.read(read)?),
        }
    }

    /// Write one file position or unsigned count at the declared width.
    /// Values too large for a 4-byte offset fail with a format error
    /// before any byte reaches the stream.
    pub fn write_offset(self, write: &mut impl Write, value: u64) -> UnitResult {
        match self.offset_size {
            OffsetSize::Four => {
                if value > self.offset_size.max_offset() {
                    return Err(Error::format("file position overflows the 4-byte offset width"));
                }

                self.byte_order.write(write, &(value as u32))?;
            },

            OffsetSize::Eight => self.byte_order.write(write, &value)?,
        }

        Ok(())
    }

    /// Read a length-prefixed string. The length prefix has offset width,
    /// the content is raw utf-8 bytes without terminator.
    pub fn read_string(self, read: &mut impl Read) -> Result<String> {
        let byte_count = self.read_offset(read)?;
        if byte_count > MAX_STRING_BYTES {
            return Err(Error::format("suspiciously long string"));
        }

        let mut bytes = vec![0_u8; byte_count as usize];
        read.read_exact(&mut bytes)?;

        String::from_utf8(bytes).map_err(|_| Error::format("string is not valid utf-8"))
    }

    /// Write a length-prefixed string.
    pub fn write_string(self, write: &mut impl Write, string: &str) -> UnitResult {
        self.write_offset(write, crate::error::usize_to_u64(string.len()))?;
        write.write_all(string.as_bytes())?;
        Ok(())
    }

    /// The number of bytes `write_string` will emit for this string.
    pub fn string_byte_count(self, string: &str) -> usize {
        self.offset_size.byte_count() + string.len()
    }
}
