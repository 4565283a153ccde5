
//! Stream samples into new layers, and assemble whole files.
//!
//! Writing is append-only: the file header and each layer header are
//! written once as placeholders, tile payloads stream strictly forward,
//! and the placeholders are rewritten in place when their content is
//! known. Nothing is ever moved, so a failed write leaves an invalid
//! file rather than a truncated-but-plausible one.

use std::mem;

use crate::encoding::Encoding;
use crate::error::{usize_to_u64, Error, Result, UnitResult};
use crate::io::{Seek, Tracking, Write};
use crate::meta::dimension::{SampleCoordinate, TileCoordinate};
use crate::meta::field::Value;
use crate::meta::layer::{Layer, LayerHandle};
use crate::meta::tags::{TagMap, TagSection};
use crate::meta::PixiHeader;

/// The explicit lifecycle of a layer writer. Modelling this as data
/// instead of loop structure guarantees that the header patch at the
/// end cannot be forgotten or performed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {

    /// No samples to write: the layer has zero tiles.
    Idle,

    /// Filling the in-memory buffer of this stored tile.
    WritingTile(usize),

    /// All tiles are flushed; awaiting `finish`.
    Finalizing,

    /// The layer header has been patched. Terminal.
    Done,

    /// A stream or codec error occurred. Terminal.
    Failed,
}

/// Writes the samples of one layer in tile order.
///
/// The writer owns exactly one in-flight tile buffer. Supply values
/// for the coordinate reported by [`LayerWriter::current_coordinate`];
/// whenever the iteration crosses a tile boundary, the buffer is
/// compressed, appended to the stream, and its position and byte count
/// are recorded for the final header patch. Padding positions of edge
/// tiles are never visited and remain zero in the stored payload.
#[derive(Debug)]
pub struct LayerWriter<'s, W: Write + Seek> {
    stream: &'s mut Tracking<W>,
    encoding: Encoding,
    layer: Layer,

    header_start: u64,
    payload_end: u64,

    state: WriterState,
    buffer: Vec<u8>,
    slot: usize,
    slot_count: usize,
    field_cursor: usize,
    tile_coordinate: TileCoordinate,
}

impl<'s, W: Write + Seek> LayerWriter<'s, W> {

    /// Reserve the header span of the layer at the current stream
    /// position and prepare to stream its tile payloads after it.
    /// The layer must be freshly described, with unfinalized tile tables.
    pub fn begin(stream: &'s mut Tracking<W>, encoding: Encoding, layer: Layer) -> Result<Self> {
        if layer.tile_offsets.iter().chain(&layer.tile_bytes).any(|&entry| entry != 0) {
            return Err(Error::usage("layer was already written"));
        }

        let header_start = stream.byte_position();
        layer.write(encoding, stream)?; // placeholder: same span as the final header
        let payload_end = stream.byte_position();

        let mut writer = LayerWriter {
            stream, encoding, layer,
            header_start, payload_end,
            state: WriterState::Idle,
            buffer: Vec::new(),
            slot: 0,
            slot_count: 0,
            field_cursor: 0,
            tile_coordinate: TileCoordinate::new(),
        };

        if writer.layer.stored_tile_count() != 0 {
            writer.enter_tile(0);
        }

        Ok(writer)
    }

    /// The layer being written.
    pub fn layer(&self) -> &Layer { &self.layer }

    /// The coordinate the next supplied value belongs to,
    /// or `None` once every sample has been written.
    pub fn current_coordinate(&self) -> Option<SampleCoordinate> {
        match self.state {
            WriterState::WritingTile(_) =>
                Some(self.layer.dimensions.tile_sample_coordinate_of(&self.tile_coordinate, self.slot)),

            _ => None,
        }
    }

    /// The field the next supplied value belongs to,
    /// or `None` once every sample has been written.
    /// Planar layers visit each tile once per field;
    /// interleaved layers cycle through the fields of each sample.
    pub fn current_field(&self) -> Option<usize> {
        match self.state {
            WriterState::WritingTile(stored_tile) =>
                Some(if self.layer.separated { self.layer.field_of_stored_tile(stored_tile) }
                     else { self.field_cursor }),

            _ => None,
        }
    }

    /// Store one field value at the current coordinate and advance.
    pub fn write_field_value(&mut self, value: Value) -> UnitResult {
        let stored_tile = match self.state {
            WriterState::WritingTile(stored_tile) => stored_tile,
            WriterState::Failed => return Err(Error::usage("layer writer failed earlier")),
            _ => return Err(Error::usage("all samples of the layer are already written")),
        };

        let field_index = self.current_field().expect("field of an active tile");
        let field_kind = self.layer.fields.list[field_index].kind;

        if value.kind() != field_kind {
            return Err(Error::usage("sample value type does not match the field type"));
        }

        let offset = self.layer.value_byte_offset(self.slot, field_index);
        value.write_to_bytes(self.encoding.byte_order, &mut self.buffer[offset ..])
            .map_err(|error| self.fail(error))?;

        // advance to the next slot, flushing at the tile boundary
        let sample_complete = self.layer.separated || {
            self.field_cursor += 1;
            self.field_cursor == self.layer.fields.len()
        };

        if sample_complete {
            self.field_cursor = 0;
            self.slot += 1;

            if self.slot == self.slot_count {
                self.complete_tile(stored_tile)?;
            }
        }

        Ok(())
    }

    /// Supply one whole uncompressed tile payload instead of individual
    /// samples, and advance to the next tile. The current tile must not
    /// have received any values yet. This is the fast path for copies
    /// that re-encode compression without decoding samples.
    pub fn write_tile(&mut self, payload: Vec<u8>) -> UnitResult {
        let stored_tile = match self.state {
            WriterState::WritingTile(stored_tile) => stored_tile,
            WriterState::Failed => return Err(Error::usage("layer writer failed earlier")),
            _ => return Err(Error::usage("all tiles of the layer are already written")),
        };

        if self.slot != 0 || self.field_cursor != 0 {
            return Err(Error::usage("the current tile was already partially written"));
        }

        if payload.len() != self.buffer.len() {
            return Err(Error::usage("tile payload byte count mismatch"));
        }

        self.buffer = payload;
        self.complete_tile(stored_tile)
    }

    /// Store a complete sample at the current coordinate and advance.
    /// Only supported for interleaved layers; planar layers are
    /// written one field plane at a time via `write_field_value`.
    pub fn write_sample(&mut self, values: &[Value]) -> UnitResult {
        if self.layer.separated {
            return Err(Error::unsupported("whole-sample writing into a planar layer"));
        }

        if self.field_cursor != 0 {
            return Err(Error::usage("a partially written sample is pending"));
        }

        if values.len() != self.layer.fields.len() {
            return Err(Error::usage("sample value count does not match the field count"));
        }

        for &value in values {
            self.write_field_value(value)?;
        }

        Ok(())
    }

    /// Pull every remaining sample from the closure, in tile order.
    /// Planar layers query each coordinate once per field plane.
    pub fn write_samples(&mut self, mut sample_at: impl FnMut(&SampleCoordinate) -> Result<crate::meta::field::Sample>) -> UnitResult {
        while let Some(coordinate) = self.current_coordinate() {
            let sample = sample_at(&coordinate)?;

            if self.layer.separated {
                let field_index = self.current_field().expect("field of an active tile");
                let value = *sample.get(field_index)
                    .ok_or_else(|| Error::usage("sample value count does not match the field count"))?;

                self.write_field_value(value)?;
            }
            else {
                self.write_sample(&sample)?;
            }
        }

        Ok(())
    }

    /// Flush state and rewrite the reserved header span with the
    /// now-complete tile tables. Consumes the writer; the stream is
    /// left at the end of the layer's payload bytes.
    pub fn finish(mut self) -> Result<Layer> {
        match self.state {
            WriterState::Idle | WriterState::Finalizing => {},
            WriterState::WritingTile(_) => return Err(Error::usage("not all samples of the layer were written")),
            WriterState::Done => unreachable!("finish consumes the writer"),
            WriterState::Failed => return Err(Error::usage("layer writer failed earlier")),
        }

        self.stream.seek_to(self.header_start)?;
        self.layer.write(self.encoding, self.stream)?;
        debug_assert_eq!(
            self.stream.byte_position() - self.header_start,
            usize_to_u64(self.layer.header_byte_count(self.encoding)),
            "layer header span changed between placeholder and patch"
        );

        self.stream.seek_to(self.payload_end)?;
        self.state = WriterState::Done;
        Ok(self.layer)
    }

    fn enter_tile(&mut self, stored_tile: usize) {
        let logical_tile = self.layer.logical_tile_of(stored_tile);
        self.tile_coordinate = self.layer.dimensions.tile_coordinate_of(logical_tile);
        self.slot = 0;
        self.slot_count = self.layer.dimensions.clipped_tile_sample_count(&self.tile_coordinate);
        self.field_cursor = 0;

        self.buffer = vec![0_u8; self.layer.uncompressed_tile_byte_count(stored_tile)];
        self.state = WriterState::WritingTile(stored_tile);
    }

    /// Flush the filled buffer and move on to the next tile,
    /// or await finalization after the last one.
    fn complete_tile(&mut self, stored_tile: usize) -> UnitResult {
        self.flush_tile(stored_tile).map_err(|error| self.fail(error))?;

        if stored_tile + 1 < self.layer.stored_tile_count() {
            self.enter_tile(stored_tile + 1);
        }
        else {
            self.state = WriterState::Finalizing;
        }

        Ok(())
    }

    fn flush_tile(&mut self, stored_tile: usize) -> UnitResult {
        let payload = self.layer.compression.compress(mem::take(&mut self.buffer))?;

        let offset = self.payload_end;
        let end = offset.checked_add(usize_to_u64(payload.len()));

        // fail before the file grows past what its offsets can address
        if end.map_or(true, |end| end > self.encoding.offset_size.max_offset()) {
            return Err(Error::format("file content overflows the declared offset width"));
        }

        debug_assert_eq!(self.stream.byte_position(), offset, "payload stream position bug");
        self.stream.write_all(&payload)?;

        self.layer.tile_offsets[stored_tile] = offset;
        self.layer.tile_bytes[stored_tile] = usize_to_u64(payload.len());
        self.payload_end = self.stream.byte_position();
        Ok(())
    }

    fn fail(&mut self, error: Error) -> Error {
        self.state = WriterState::Failed;
        error
    }
}

/// Assembles a complete pixi file: header placeholder first, then any
/// number of tag sections and layers in the order they are written,
/// patching the header and chain pointers as the content lands.
#[derive(Debug)]
pub struct PixiWriter<W: Write + Seek> {
    stream: Tracking<W>,
    header: PixiHeader,
    layers: Vec<Layer>,

    end_position: u64,
    last_tag_slot: Option<u64>,
    last_layer_slot: Option<u64>,
}

/// Write a pixi file by filling a [`PixiWriter`] in a closure.
/// Ensures the stream is flushed after the content is complete.
pub fn write_pixi_with<W: Write + Seek>(
    stream: W,
    encoding: Encoding,
    build: impl FnOnce(&mut PixiWriter<W>) -> UnitResult,
) -> Result<W> {
    let mut writer = PixiWriter::new(stream, encoding)?;
    build(&mut writer)?;
    writer.finish()
}

impl<W: Write + Seek> PixiWriter<W> {

    /// Start a new file at the beginning of the stream,
    /// writing the header with still-empty chain offsets.
    pub fn new(stream: W, encoding: Encoding) -> Result<Self> {
        let mut stream = Tracking::new(stream)?;
        stream.seek_to(0)?;

        let header = PixiHeader::new(encoding);
        header.write(&mut stream)?;
        let end_position = stream.byte_position();

        Ok(PixiWriter {
            stream, header,
            layers: Vec::new(),
            end_position,
            last_tag_slot: None,
            last_layer_slot: None,
        })
    }

    /// The header as it will appear in the finished file.
    pub fn header(&self) -> &PixiHeader { &self.header }

    /// The layers finalized so far.
    pub fn layers(&self) -> &[Layer] { &self.layers }

    /// Append one tag section and link it into the tag chain.
    pub fn write_tags(&mut self, tags: TagMap) -> UnitResult {
        let encoding = self.header.encoding;
        let section_start = self.end_position;
        self.stream.seek_to(section_start)?;

        let section = TagSection::new(tags);
        section.write(encoding, &mut self.stream)?;
        self.end_position = self.stream.byte_position();

        match self.last_tag_slot {
            // rewrite the former tail's next pointer
            Some(slot) => {
                self.stream.seek_to(slot)?;
                encoding.write_offset(&mut self.stream, section_start)?;
            },

            // this is the first section: hook it into the header
            None => {
                self.stream.seek_to(self.header.first_tags_slot_position())?;
                encoding.write_offset(&mut self.stream, section_start)?;
                self.header.first_tags_offset = section_start;
            },
        }

        self.last_tag_slot = Some(section.next_slot_position(encoding, section_start));
        Ok(())
    }

    /// Append one layer, filling its samples inside the closure,
    /// and link it into the layer chain. The header's first-layer
    /// offset is rewritten exactly once, for the first layer.
    pub fn write_layer(
        &mut self,
        layer: Layer,
        fill: impl FnOnce(&mut LayerWriter<'_, W>) -> UnitResult,
    ) -> Result<LayerHandle> {
        let encoding = self.header.encoding;
        let layer_start = self.end_position;
        self.stream.seek_to(layer_start)?;

        let mut writer = LayerWriter::begin(&mut self.stream, encoding, layer)?;
        fill(&mut writer)?;
        let layer = writer.finish()?;
        self.end_position = self.stream.byte_position();

        match self.last_layer_slot {
            // rewrite the previous layer's next pointer
            Some(slot) => {
                self.stream.seek_to(slot)?;
                encoding.write_offset(&mut self.stream, layer_start)?;
            },

            // this is the first layer: hook it into the header
            None => {
                self.stream.seek_to(self.header.first_layer_slot_position())?;
                encoding.write_offset(&mut self.stream, layer_start)?;
                self.header.first_layer_offset = layer_start;
            },
        }

        self.last_layer_slot = Some(layer_start + usize_to_u64(layer.next_slot_byte_offset(encoding)));
        self.layers.push(layer);
        Ok(self.layers.len() - 1)
    }

    /// Flush the stream and hand it back.
    /// The file is complete and readable at this point.
    pub fn finish(mut self) -> Result<W> {
        self.stream.flush()?;
        Ok(self.stream.into_inner())
    }
}
