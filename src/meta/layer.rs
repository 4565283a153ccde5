
//! Describes a single layer in a file: one n-dimensional tiled raster
//! with a fixed field schema, and where each of its compressed tiles
//! lives in the file.
//!
//! A file can have any number of layers, chained through
//! `next_layer_start` positions starting at the file header.

use std::collections::HashSet;

use crate::compression::{ByteVec, Compression};
use crate::encoding::Encoding;
use crate::error::{u64_to_usize, usize_to_u64, Error, Result, UnitResult};
use crate::io::{Read, Seek, SeekFrom, Write};
use crate::meta::dimension::{Dimension, DimensionSet};
use crate::meta::field::{Field, FieldSet};

/// Refers to one layer of an opened file by position
/// in [`crate::meta::Pixi::layers`].
pub type LayerHandle = usize;

/// Describes a single layer and locates its tile payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {

    /// The name of this layer.
    pub name: String,

    /// The axes of this layer, in linearization order.
    pub dimensions: DimensionSet,

    /// The fields of every sample in this layer.
    pub fields: FieldSet,

    /// Whether each field occupies its own tiles (planar storage)
    /// instead of being interleaved per sample.
    pub separated: bool,

    /// How every tile payload of this layer is compressed.
    pub compression: Compression,

    /// Absolute file position of each stored tile payload.
    /// Finalized tiles always have a position greater than zero.
    pub tile_offsets: Vec<u64>,

    /// Stored byte count of each tile payload.
    /// Finalized tiles always have a byte count greater than zero.
    pub tile_bytes: Vec<u64>,

    /// Absolute file position of the next layer, or zero at the tail.
    pub next_layer_start: u64,
}

impl Layer {

    /// Describe a new layer with unfinalized (zeroed) tile tables.
    pub fn new(
        name: impl Into<String>,
        dimensions: DimensionSet,
        fields: FieldSet,
        separated: bool,
        compression: Compression,
    ) -> Result<Self>
    {
        let mut layer = Layer {
            name: name.into(),
            dimensions, fields, separated, compression,
            tile_offsets: Vec::new(),
            tile_bytes: Vec::new(),
            next_layer_start: 0,
        };

        layer.validate_schema()?;
        let stored_tiles = layer.stored_tile_count();
        layer.tile_offsets = vec![0; stored_tiles];
        layer.tile_bytes = vec![0; stored_tiles];
        Ok(layer)
    }

    /// Number of tile payloads stored on disk.
    /// Planar layers store one payload per field per logical tile.
    pub fn stored_tile_count(&self) -> usize {
        let planes = if self.separated { self.fields.len() } else { 1 };
        self.dimensions.tile_count() * planes
    }

    /// Which field the specified stored tile belongs to.
    /// Always zero-for-all in interleaved layers.
    pub fn field_of_stored_tile(&self, stored_tile: usize) -> usize {
        if self.separated { stored_tile % self.fields.len() } else { 0 }
    }

    /// The logical tile (grid position index) of a stored tile.
    pub fn logical_tile_of(&self, stored_tile: usize) -> usize {
        if self.separated { stored_tile / self.fields.len() } else { stored_tile }
    }

    /// The stored tile holding the specified field of a logical tile.
    pub fn stored_tile_of(&self, logical_tile: usize, field_index: usize) -> usize {
        if self.separated { logical_tile * self.fields.len() + field_index } else { logical_tile }
    }

    /// Byte count of one uncompressed tile payload.
    /// Edge tiles store the same full tile shape as interior tiles.
    pub fn uncompressed_tile_byte_count(&self, stored_tile: usize) -> usize {
        let samples_per_tile = self.dimensions.tile_sample_count();

        let bytes_per_sample =
            if self.separated { self.fields.list[self.field_of_stored_tile(stored_tile)].kind.byte_count() }
            else { self.fields.byte_count() };

        samples_per_tile * bytes_per_sample
    }

    /// Byte offset of one sample's value inside an uncompressed tile payload.
    /// For interleaved layers this addresses the start of the whole sample
    /// plus the field offset; for planar layers it addresses the value
    /// within the tile of the specified field.
    pub fn value_byte_offset(&self, in_tile_index: usize, field_index: usize) -> usize {
        if self.separated {
            in_tile_index * self.fields.list[field_index].kind.byte_count()
        }
        else {
            in_tile_index * self.fields.byte_count() + self.fields.offset(field_index)
        }
    }

    /// Read a layer header at the current stream position,
    /// filling both tile tables completely before returning.
    pub fn read(encoding: Encoding, read: &mut impl Read) -> Result<Self> {
        let name = encoding.read_string(read)?;

        let dimension_count = encoding.read_offset(read)?;
        if dimension_count > 255 {
            return Err(Error::format("unreasonable dimension count"));
        }

        let mut dimensions = DimensionSet::default();
        for _ in 0 .. dimension_count {
            dimensions.list.push(Dimension::read(encoding, read)?);
        }

        let field_count = encoding.read_offset(read)?;
        if field_count > 4096 {
            return Err(Error::format("unreasonable field count"));
        }

        let mut fields = FieldSet::default();
        for _ in 0 .. field_count {
            fields.list.push(Field::read(encoding, read)?);
        }

        let separated = match encoding.byte_order.read::<_, u8>(read)? {
            0 => false,
            1 => true,
            _ => return Err(Error::format("invalid separated flag")),
        };

        let compression = Compression::from_tag(encoding.byte_order.read(read)?)?;

        let mut layer = Layer {
            name, dimensions, fields, separated, compression,
            tile_offsets: Vec::new(),
            tile_bytes: Vec::new(),
            next_layer_start: 0,
        };

        layer.validate_schema()?;

        if encoding.read_offset(read)? != usize_to_u64(layer.stored_tile_count()) {
            return Err(Error::format("tile count contradicts dimensions and fields"));
        }

        let stored_tiles = layer.stored_tile_count();
        layer.tile_offsets = read_offset_table(encoding, read, stored_tiles)?;
        layer.tile_bytes = read_offset_table(encoding, read, stored_tiles)?;
        layer.next_layer_start = encoding.read_offset(read)?;

        layer.validate_tile_tables()?;
        Ok(layer)
    }

    /// Write the complete layer header at the current stream position,
    /// including the current contents of both tile tables.
    pub fn write(&self, encoding: Encoding, write: &mut impl Write) -> UnitResult {
        debug_assert_eq!(self.tile_offsets.len(), self.stored_tile_count(), "tile table length bug");
        debug_assert_eq!(self.tile_bytes.len(), self.stored_tile_count(), "tile table length bug");

        encoding.write_string(write, &self.name)?;

        encoding.write_offset(write, usize_to_u64(self.dimensions.len()))?;
        for dimension in self.dimensions.iter() {
            dimension.write(encoding, write)?;
        }

        encoding.write_offset(write, usize_to_u64(self.fields.len()))?;
        for field in self.fields.iter() {
            field.write(encoding, write)?;
        }

        encoding.byte_order.write(write, &u8::from(self.separated))?;
        encoding.byte_order.write(write, &self.compression.to_tag())?;

        encoding.write_offset(write, usize_to_u64(self.stored_tile_count()))?;
        for &offset in &self.tile_offsets { encoding.write_offset(write, offset)?; }
        for &byte_count in &self.tile_bytes { encoding.write_offset(write, byte_count)?; }

        encoding.write_offset(write, self.next_layer_start)?;
        Ok(())
    }

    /// The number of bytes `write` will emit for this layer header.
    pub fn header_byte_count(&self, encoding: Encoding) -> usize {
        let offset_bytes = encoding.offset_size.byte_count();

        encoding.string_byte_count(&self.name)
            + offset_bytes // dimension count
            + self.dimensions.iter().map(|dimension| dimension.header_byte_count(encoding)).sum::<usize>()
            + offset_bytes // field count
            + self.fields.iter().map(|field| field.header_byte_count(encoding)).sum::<usize>()
            + 2 // separated flag and compression tag
            + offset_bytes // tile count
            + 2 * self.stored_tile_count() * offset_bytes // both tile tables
            + offset_bytes // next layer position
    }

    /// Byte offset of the tile tables within this layer header.
    pub fn tile_table_byte_offset(&self, encoding: Encoding) -> usize {
        let offset_bytes = encoding.offset_size.byte_count();
        self.header_byte_count(encoding) - (2 * self.stored_tile_count() + 1) * offset_bytes
    }

    /// Byte offset of the next-layer pointer within this layer header.
    pub fn next_slot_byte_offset(&self, encoding: Encoding) -> usize {
        self.header_byte_count(encoding) - encoding.offset_size.byte_count()
    }

    /// Read and decompress one stored tile payload.
    /// The result always has `uncompressed_tile_byte_count` bytes.
    pub fn read_tile(&self, stream: &mut (impl Read + Seek), stored_tile: usize) -> Result<ByteVec> {
        let offset = *self.tile_offsets.get(stored_tile)
            .ok_or_else(|| Error::bounds("stored tile index outside the tile table"))?;

        let byte_count = u64_to_usize(self.tile_bytes[stored_tile]);

        if offset == 0 || byte_count == 0 {
            return Err(Error::format("tile has not been finalized"));
        }

        stream.seek(SeekFrom::Start(offset))?;
        let mut compressed = vec![0_u8; byte_count];
        stream.read_exact(&mut compressed)?;

        self.compression.decompress(compressed, self.uncompressed_tile_byte_count(stored_tile))
    }

    /// Check the schema parts that do not depend on tile finalization.
    fn validate_schema(&self) -> UnitResult {
        if self.dimensions.is_empty() {
            return Err(Error::format("layer has no dimensions"));
        }

        if self.fields.is_empty() {
            return Err(Error::format("layer has no fields"));
        }

        let mut names = HashSet::new();
        if !self.fields.iter().all(|field| names.insert(field.name.as_str())) {
            return Err(Error::format("duplicate field name"));
        }

        Ok(())
    }

    /// Check that all tiles are finalized and that no two payloads overlap.
    fn validate_tile_tables(&self) -> UnitResult {
        let finalized = self.tile_offsets.iter().zip(&self.tile_bytes)
            .all(|(&offset, &byte_count)| offset > 0 && byte_count > 0);

        if !finalized {
            return Err(Error::format("layer contains unfinalized tiles"));
        }

        // tiles may appear in any storage order, but must not overlap
        let mut extents: Vec<(u64, u64)> = self.tile_offsets.iter().zip(&self.tile_bytes)
            .map(|(&offset, &byte_count)| (offset, byte_count))
            .collect();

        extents.sort_unstable();

        let overlapping = extents.windows(2).any(|pair| {
            let (earlier_offset, earlier_bytes) = pair[0];
            let (later_offset, _) = pair[1];
            earlier_offset.checked_add(earlier_bytes).map_or(true, |end| end > later_offset)
        });

        if overlapping {
            return Err(Error::format("tile payloads overlap"));
        }

        Ok(())
    }
}

fn read_offset_table(encoding: Encoding, read: &mut impl Read, count: usize) -> Result<Vec<u64>> {
    let mut table = Vec::with_capacity(count);
    for _ in 0 .. count {
        table.push(encoding.read_offset(read)?);
    }

    Ok(table)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::encoding::{ByteOrder, OffsetSize};
    use crate::meta::field::FieldType;
    use std::io::Cursor;

    fn encoding() -> Encoding {
        Encoding::new(ByteOrder::LittleEndian, OffsetSize::Eight)
    }

    fn example_layer(separated: bool) -> Layer {
        let mut layer = Layer::new(
            "surface",
            DimensionSet::new(vec![
                Dimension::new("x", 10, 5).unwrap(),
                Dimension::new("y", 20, 5).unwrap(),
            ]),
            FieldSet::new(vec![
                Field::new("lum", FieldType::F32),
                Field::new("depth", FieldType::U16),
            ]),
            separated,
            Compression::None,
        ).unwrap();

        // pretend all tiles were written back to back
        let tile_bytes = 64_u64;
        for tile in 0 .. layer.stored_tile_count() {
            layer.tile_offsets[tile] = 1000 + tile as u64 * tile_bytes;
            layer.tile_bytes[tile] = tile_bytes;
        }

        layer
    }

    #[test]
    fn stored_tile_counts() {
        assert_eq!(example_layer(false).stored_tile_count(), 2 * 4);
        assert_eq!(example_layer(true).stored_tile_count(), 2 * 4 * 2);
    }

    #[test]
    fn plane_addressing_cycles_fields_fastest() {
        let layer = example_layer(true);

        assert_eq!(layer.field_of_stored_tile(0), 0);
        assert_eq!(layer.field_of_stored_tile(1), 1);
        assert_eq!(layer.field_of_stored_tile(2), 0);

        assert_eq!(layer.logical_tile_of(0), 0);
        assert_eq!(layer.logical_tile_of(1), 0);
        assert_eq!(layer.logical_tile_of(2), 1);

        assert_eq!(layer.stored_tile_of(3, 1), 7);
    }

    #[test]
    fn uncompressed_tile_sizes() {
        let interleaved = example_layer(false);
        assert_eq!(interleaved.uncompressed_tile_byte_count(0), 5 * 5 * 6);

        let planar = example_layer(true);
        assert_eq!(planar.uncompressed_tile_byte_count(0), 5 * 5 * 4); // f32 plane
        assert_eq!(planar.uncompressed_tile_byte_count(1), 5 * 5 * 2); // u16 plane
    }

    #[test]
    fn value_byte_offsets() {
        let interleaved = example_layer(false);
        assert_eq!(interleaved.value_byte_offset(0, 0), 0);
        assert_eq!(interleaved.value_byte_offset(0, 1), 4);
        assert_eq!(interleaved.value_byte_offset(3, 1), 3 * 6 + 4);

        let planar = example_layer(true);
        assert_eq!(planar.value_byte_offset(3, 0), 12);
        assert_eq!(planar.value_byte_offset(3, 1), 6);
    }

    #[test]
    fn headers_roundtrip() {
        for separated in [false, true] {
            let layer = example_layer(separated);

            let mut bytes = Vec::new();
            layer.write(encoding(), &mut bytes).unwrap();
            assert_eq!(bytes.len(), layer.header_byte_count(encoding()));

            let decoded = Layer::read(encoding(), &mut Cursor::new(bytes)).unwrap();
            assert_eq!(decoded, layer);
        }
    }

    #[test]
    fn unfinalized_tiles_are_rejected_on_read() {
        let mut layer = example_layer(false);
        layer.tile_offsets[3] = 0;

        let mut bytes = Vec::new();
        layer.write(encoding(), &mut bytes).unwrap();

        let result = Layer::read(encoding(), &mut Cursor::new(bytes));
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn overlapping_tiles_are_rejected_on_read() {
        let mut layer = example_layer(false);
        layer.tile_offsets[1] = layer.tile_offsets[0] + 1; // overlaps tile 0

        let mut bytes = Vec::new();
        layer.write(encoding(), &mut bytes).unwrap();

        let result = Layer::read(encoding(), &mut Cursor::new(bytes));
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn wrong_tile_count_is_rejected_on_read() {
        let layer = example_layer(false);
        let mut bytes = Vec::new();
        layer.write(encoding(), &mut bytes).unwrap();

        // corrupt the persisted tile count
        let tile_count_position = layer.tile_table_byte_offset(encoding()) - encoding().offset_size.byte_count();
        bytes[tile_count_position] = 99;

        let result = Layer::read(encoding(), &mut Cursor::new(bytes));
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn empty_schemas_are_rejected() {
        assert!(Layer::new(
            "no-dimensions", DimensionSet::default(),
            FieldSet::new(vec![Field::new("v", FieldType::U8)]),
            false, Compression::None,
        ).is_err());

        assert!(Layer::new(
            "no-fields",
            DimensionSet::new(vec![Dimension::new("x", 4, 2).unwrap()]),
            FieldSet::default(),
            false, Compression::None,
        ).is_err());
    }

    #[test]
    fn zero_size_dimension_yields_an_empty_layer() {
        let layer = Layer::new(
            "empty",
            DimensionSet::new(vec![Dimension::new("x", 0, 4).unwrap()]),
            FieldSet::new(vec![Field::new("v", FieldType::U8)]),
            false, Compression::None,
        ).unwrap();

        assert_eq!(layer.stored_tile_count(), 0);

        let mut bytes = Vec::new();
        layer.write(encoding(), &mut bytes).unwrap();
        let decoded = Layer::read(encoding(), &mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, layer);
    }

    #[test]
    fn reading_a_tile_restores_the_written_payload() {
        let mut layer = Layer::new(
            "single",
            DimensionSet::new(vec![Dimension::new("x", 4, 4).unwrap()]),
            FieldSet::new(vec![Field::new("v", FieldType::U8)]),
            false, Compression::Rle8,
        ).unwrap();

        let payload = vec![9_u8; 4];
        let compressed = Compression::Rle8.compress(payload.clone()).unwrap();

        let mut file_bytes = vec![0_u8; 32]; // pretend a header occupies the file start
        let offset = file_bytes.len() as u64;
        file_bytes.extend_from_slice(&compressed);

        layer.tile_offsets[0] = offset;
        layer.tile_bytes[0] = compressed.len() as u64;

        let mut stream = Cursor::new(file_bytes);
        assert_eq!(layer.read_tile(&mut stream, 0).unwrap(), payload);

        assert!(matches!(layer.read_tile(&mut stream, 1), Err(Error::Bounds(_))));
    }
}
