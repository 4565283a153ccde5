
//! Pull samples out of a layer in tile order.

use smallvec::SmallVec;

use crate::compression::ByteVec;
use crate::encoding::ByteOrder;
use crate::error::{Result, UnitResult};
use crate::io::{Read, Seek};
use crate::meta::dimension::{SampleCoordinate, TileCoordinate};
use crate::meta::field::Sample;
use crate::meta::layer::Layer;

/// Iterates all samples of one layer in tile order, yielding
/// `(coordinate, sample)` pairs. Each tile payload is loaded and
/// decompressed exactly once, when the iteration enters it; planar
/// layers load all field planes of the current tile together.
///
/// The sequence is finite and not restartable: construct a new reader
/// to iterate again. After the first error, the iterator halts and the
/// layer content must be considered incomplete.
#[derive(Debug)]
pub struct TileSamplesReader<'l, S> {
    layer: &'l Layer,
    byte_order: ByteOrder,
    stream: S,

    next_logical_tile: usize,
    tile_coordinate: TileCoordinate,
    planes: SmallVec<[ByteVec; 4]>,
    slot: usize,
    slot_count: usize,

    finished: bool,
}

impl<'l, S: Read + Seek> TileSamplesReader<'l, S> {

    /// Start iterating the layer from its first tile.
    /// The layer must have been read from (or written to) this stream.
    pub fn new(stream: S, byte_order: ByteOrder, layer: &'l Layer) -> Self {
        TileSamplesReader {
            layer, byte_order, stream,
            next_logical_tile: 0,
            tile_coordinate: TileCoordinate::new(),
            planes: SmallVec::new(),
            slot: 0,
            slot_count: 0,
            finished: false,
        }
    }

    /// The layer this reader iterates.
    pub fn layer(&self) -> &Layer { self.layer }

    /// Release the underlying stream.
    pub fn into_stream(self) -> S { self.stream }

    fn load_tile(&mut self, logical_tile: usize) -> UnitResult {
        self.tile_coordinate = self.layer.dimensions.tile_coordinate_of(logical_tile);

        self.planes.clear();
        let plane_count = if self.layer.separated { self.layer.fields.len() } else { 1 };

        for field_index in 0 .. plane_count {
            let stored_tile = self.layer.stored_tile_of(logical_tile, field_index);
            self.planes.push(self.layer.read_tile(&mut self.stream, stored_tile)?);
        }

        self.slot = 0;
        self.slot_count = self.layer.dimensions.clipped_tile_sample_count(&self.tile_coordinate);
        Ok(())
    }

    fn decode_slot(&self, slot: usize) -> Result<(SampleCoordinate, Sample)> {
        let coordinate = self.layer.dimensions.tile_sample_coordinate_of(&self.tile_coordinate, slot);

        let sample = (0 .. self.layer.fields.len())
            .map(|field_index| {
                let plane = if self.layer.separated { &self.planes[field_index] } else { &self.planes[0] };
                let offset = self.layer.value_byte_offset(slot, field_index);
                self.layer.fields.list[field_index].kind.value_from_bytes(self.byte_order, &plane[offset ..])
            })
            .collect::<Result<Sample>>()?;

        Ok((coordinate, sample))
    }
}

impl<S: Read + Seek> Iterator for TileSamplesReader<'_, S> {
    type Item = Result<(SampleCoordinate, Sample)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        // enter the next tile when the current one is exhausted
        // (every tile contains at least one sample)
        while self.slot == self.slot_count {
            if self.next_logical_tile == self.layer.dimensions.tile_count() {
                self.finished = true;
                return None;
            }

            let loading = self.load_tile(self.next_logical_tile);
            self.next_logical_tile += 1;

            if let Err(error) = loading {
                self.finished = true;
                return Some(Err(error));
            }
        }

        let result = self.decode_slot(self.slot);
        self.slot += 1;

        if result.is_err() {
            self.finished = true;
        }

        Some(result)
    }
}
