
//! Fields (also called channels) and the runtime-typed sample values.
//!
//! Every sample of a layer is a tuple of scalar values, one per field.
//! The scalar types are closed: ten integer and float kinds. A value is
//! represented as a tagged sum over those kinds, while hot loops can
//! stay on the raw per-field byte slices and decode lazily.

use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::encoding::{ByteOrder, Encoding};
use crate::error::{Error, Result, UnitResult};
use crate::io::{Read, Write};

/// List of fields. Most layers have only a few.
pub type FieldList = SmallVec<[Field; 4]>;

/// The tuple of field values at one coordinate.
pub type Sample = SmallVec<[Value; 4]>;

/// The scalar element type of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Signed 8 bit integer.
    I8,
    /// Signed 16 bit integer.
    I16,
    /// Signed 32 bit integer.
    I32,
    /// Signed 64 bit integer.
    I64,
    /// Unsigned 8 bit integer.
    U8,
    /// Unsigned 16 bit integer.
    U16,
    /// Unsigned 32 bit integer.
    U32,
    /// Unsigned 64 bit integer.
    U64,
    /// 32 bit ieee float.
    F32,
    /// 64 bit ieee float.
    F64,
}

/// One runtime-typed scalar sample component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Signed 8 bit integer.
    I8(i8),
    /// Signed 16 bit integer.
    I16(i16),
    /// Signed 32 bit integer.
    I32(i32),
    /// Signed 64 bit integer.
    I64(i64),
    /// Unsigned 8 bit integer.
    U8(u8),
    /// Unsigned 16 bit integer.
    U16(u16),
    /// Unsigned 32 bit integer.
    U32(u32),
    /// Unsigned 64 bit integer.
    U64(u64),
    /// 32 bit ieee float.
    F32(f32),
    /// 64 bit ieee float.
    F64(f64),
}

/// One scalar component of the samples in a layer,
/// with optional stored value bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {

    /// Field name, for example `"r"` or `"depth"`.
    pub name: String,

    /// Scalar type of all values of this field.
    pub kind: FieldType,

    /// Smallest value occurring in the layer, if recorded.
    pub min: Option<Value>,

    /// Largest value occurring in the layer, if recorded.
    pub max: Option<Value>,
}

/// The ordered fields of one layer. The order defines
/// the in-sample byte layout of contiguous tiles.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldSet {

    /// The fields, in declaration order.
    pub list: FieldList,
}

const ALL_FIELD_TYPES: [FieldType; 10] = [
    FieldType::I8, FieldType::I16, FieldType::I32, FieldType::I64,
    FieldType::U8, FieldType::U16, FieldType::U32, FieldType::U64,
    FieldType::F32, FieldType::F64,
];

impl FieldType {

    /// The on-disk type tag. Tags form a contiguous range starting at 1,
    /// so that zeroed bytes never decode as a valid field type.
    pub fn to_tag(self) -> u8 {
        match self {
            FieldType::I8 => 1, FieldType::I16 => 2, FieldType::I32 => 3, FieldType::I64 => 4,
            FieldType::U8 => 5, FieldType::U16 => 6, FieldType::U32 => 7, FieldType::U64 => 8,
            FieldType::F32 => 9, FieldType::F64 => 10,
        }
    }

    /// Interpret an on-disk type tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1..=10 => Ok(ALL_FIELD_TYPES[(tag - 1) as usize]),
            _ => Err(Error::unsupported("unknown field type tag")),
        }
    }

    /// Width of one element of this type in bytes.
    pub fn byte_count(self) -> usize {
        match self {
            FieldType::I8 | FieldType::U8 => 1,
            FieldType::I16 | FieldType::U16 => 2,
            FieldType::I32 | FieldType::U32 | FieldType::F32 => 4,
            FieldType::I64 | FieldType::U64 | FieldType::F64 => 8,
        }
    }

    /// Decode one value of this type from the stream.
    pub fn read_value(self, byte_order: ByteOrder, read: &mut impl Read) -> Result<Value> {
        Ok(match self {
            FieldType::I8 => Value::I8(byte_order.read(read)?),
            FieldType::I16 => Value::I16(byte_order.read(read)?),
            FieldType::I32 => Value::I32(byte_order.read(read)?),
            FieldType::I64 => Value::I64(byte_order.read(read)?),
            FieldType::U8 => Value::U8(byte_order.read(read)?),
            FieldType::U16 => Value::U16(byte_order.read(read)?),
            FieldType::U32 => Value::U32(byte_order.read(read)?),
            FieldType::U64 => Value::U64(byte_order.read(read)?),
            FieldType::F32 => Value::F32(byte_order.read(read)?),
            FieldType::F64 => Value::F64(byte_order.read(read)?),
        })
    }

    /// Decode one value of this type from an in-memory buffer.
    pub fn value_from_bytes(self, byte_order: ByteOrder, bytes: &[u8]) -> Result<Value> {
        let mut read = bytes;
        self.read_value(byte_order, &mut read)
    }
}

impl Value {

    /// The scalar type of this value.
    pub fn kind(&self) -> FieldType {
        match self {
            Value::I8(_) => FieldType::I8, Value::I16(_) => FieldType::I16,
            Value::I32(_) => FieldType::I32, Value::I64(_) => FieldType::I64,
            Value::U8(_) => FieldType::U8, Value::U16(_) => FieldType::U16,
            Value::U32(_) => FieldType::U32, Value::U64(_) => FieldType::U64,
            Value::F32(_) => FieldType::F32, Value::F64(_) => FieldType::F64,
        }
    }

    /// Encode this value to the stream in the specified byte order.
    pub fn write(&self, byte_order: ByteOrder, write: &mut impl Write) -> UnitResult {
        match self {
            Value::I8(value) => byte_order.write(write, value)?,
            Value::I16(value) => byte_order.write(write, value)?,
            Value::I32(value) => byte_order.write(write, value)?,
            Value::I64(value) => byte_order.write(write, value)?,
            Value::U8(value) => byte_order.write(write, value)?,
            Value::U16(value) => byte_order.write(write, value)?,
            Value::U32(value) => byte_order.write(write, value)?,
            Value::U64(value) => byte_order.write(write, value)?,
            Value::F32(value) => byte_order.write(write, value)?,
            Value::F64(value) => byte_order.write(write, value)?,
        }

        Ok(())
    }

    /// Encode this value into an in-memory buffer
    /// which must be at least as wide as the value.
    pub fn write_to_bytes(&self, byte_order: ByteOrder, bytes: &mut [u8]) -> UnitResult {
        debug_assert!(bytes.len() >= self.kind().byte_count(), "value target buffer too small");
        let mut write = bytes;
        self.write(byte_order, &mut write)
    }

    /// Totally order two values of the same scalar type.
    /// Floats compare by ieee total order, so nan has a defined place.
    /// Comparing values of different types is a usage error.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::I8(a), Value::I8(b)) => Ok(a.cmp(b)),
            (Value::I16(a), Value::I16(b)) => Ok(a.cmp(b)),
            (Value::I32(a), Value::I32(b)) => Ok(a.cmp(b)),
            (Value::I64(a), Value::I64(b)) => Ok(a.cmp(b)),
            (Value::U8(a), Value::U8(b)) => Ok(a.cmp(b)),
            (Value::U16(a), Value::U16(b)) => Ok(a.cmp(b)),
            (Value::U32(a), Value::U32(b)) => Ok(a.cmp(b)),
            (Value::U64(a), Value::U64(b)) => Ok(a.cmp(b)),
            (Value::F32(a), Value::F32(b)) => Ok(a.total_cmp(b)),
            (Value::F64(a), Value::F64(b)) => Ok(a.total_cmp(b)),
            _ => Err(Error::usage("comparing values of different scalar types")),
        }
    }

    /// Widen this value to a float, for resampling arithmetic.
    /// Large 64 bit integers may lose precision.
    pub fn to_f64(&self) -> f64 {
        match *self {
            Value::I8(value) => f64::from(value),
            Value::I16(value) => f64::from(value),
            Value::I32(value) => f64::from(value),
            Value::I64(value) => value as f64,
            Value::U8(value) => f64::from(value),
            Value::U16(value) => f64::from(value),
            Value::U32(value) => f64::from(value),
            Value::U64(value) => value as f64,
            Value::F32(value) => f64::from(value),
            Value::F64(value) => value,
        }
    }

    /// Narrow a float back to the specified scalar type.
    /// Integer targets round half to even and saturate at the type range.
    pub fn from_f64(kind: FieldType, value: f64) -> Value {
        match kind {
            FieldType::I8 => Value::I8(round_to_integer(value, i8::MIN as f64, i8::MAX as f64) as i8),
            FieldType::I16 => Value::I16(round_to_integer(value, i16::MIN as f64, i16::MAX as f64) as i16),
            FieldType::I32 => Value::I32(round_to_integer(value, i32::MIN as f64, i32::MAX as f64) as i32),
            FieldType::I64 => Value::I64(round_to_integer(value, i64::MIN as f64, i64::MAX as f64) as i64),
            FieldType::U8 => Value::U8(round_to_integer(value, 0.0, u8::MAX as f64) as u8),
            FieldType::U16 => Value::U16(round_to_integer(value, 0.0, u16::MAX as f64) as u16),
            FieldType::U32 => Value::U32(round_to_integer(value, 0.0, u32::MAX as f64) as u32),
            FieldType::U64 => Value::U64(round_to_integer(value, 0.0, u64::MAX as f64) as u64),
            FieldType::F32 => Value::F32(value as f32),
            FieldType::F64 => Value::F64(value),
        }
    }
}

/// Round half to even, then clamp into the target range.
fn round_to_integer(value: f64, min: f64, max: f64) -> f64 {
    let floor = value.floor();
    let fraction = value - floor;

    let rounded =
        if fraction > 0.5 { floor + 1.0 }
        else if fraction < 0.5 { floor }
        else if (floor as i64) % 2 == 0 { floor } // exactly halfway: take the even neighbor
        else { floor + 1.0 };

    rounded.clamp(min, max)
}

impl Field {

    /// Create a field without stored bounds.
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Field { name: name.into(), kind, min: None, max: None }
    }

    /// Read one field description from a layer header.
    pub fn read(encoding: Encoding, read: &mut impl Read) -> Result<Self> {
        let name = encoding.read_string(read)?;
        let kind = FieldType::from_tag(encoding.byte_order.read(read)?)?;

        let bounds_flags: u8 = encoding.byte_order.read(read)?;
        if bounds_flags > 0b11 {
            return Err(Error::format("invalid field bounds flags"));
        }

        let min = if bounds_flags & 0b01 != 0 { Some(kind.read_value(encoding.byte_order, read)?) } else { None };
        let max = if bounds_flags & 0b10 != 0 { Some(kind.read_value(encoding.byte_order, read)?) } else { None };

        Ok(Field { name, kind, min, max })
    }

    /// Write one field description into a layer header.
    pub fn write(&self, encoding: Encoding, write: &mut impl Write) -> UnitResult {
        debug_assert!(self.min.iter().chain(&self.max).all(|bound| bound.kind() == self.kind), "field bounds type mismatch");

        encoding.write_string(write, &self.name)?;
        encoding.byte_order.write(write, &self.kind.to_tag())?;

        let bounds_flags =
            if self.min.is_some() { 0b01_u8 } else { 0 } |
            if self.max.is_some() { 0b10_u8 } else { 0 };

        encoding.byte_order.write(write, &bounds_flags)?;
        if let Some(min) = &self.min { min.write(encoding.byte_order, write)?; }
        if let Some(max) = &self.max { max.write(encoding.byte_order, write)?; }

        Ok(())
    }

    /// The number of bytes `write` will emit for this field description.
    pub fn header_byte_count(&self, encoding: Encoding) -> usize {
        encoding.string_byte_count(&self.name)
            + 2 // type tag and bounds flags
            + self.min.iter().chain(&self.max).count() * self.kind.byte_count()
    }
}

impl FieldSet {

    /// Group fields into a set.
    pub fn new(list: impl Into<FieldList>) -> Self {
        FieldSet { list: list.into() }
    }

    /// Number of fields.
    pub fn len(&self) -> usize { self.list.len() }

    /// Whether there are no fields at all.
    pub fn is_empty(&self) -> bool { self.list.is_empty() }

    /// Iterate over the fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Field> { self.list.iter() }

    /// Bytes per sample when all fields are interleaved.
    pub fn byte_count(&self) -> usize {
        self.list.iter().map(|field| field.kind.byte_count()).sum()
    }

    /// Byte offset of the specified field within one interleaved sample.
    pub fn offset(&self, field_index: usize) -> usize {
        self.list[.. field_index].iter().map(|field| field.kind.byte_count()).sum()
    }

    /// Index of the first field with the specified name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.list.iter().position(|field| field.name == name)
    }
}
