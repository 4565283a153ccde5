
//! Bounded caches of decompressed tiles, shared between readers.
//!
//! Random access into a compressed layer would otherwise decompress
//! the same tile over and over. The cache is keyed by stored tile
//! index and bounded to a fixed number of tiles, so memory use is at
//! most `capacity * uncompressed_tile_byte_count` per reader session.
//!
//! Multiple threads may read through one cache: hits only take a read
//! lock on the tile map, while misses serialize on the stream lock, so
//! concurrent misses on the same tile decompress exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use crate::encoding::ByteOrder;
use crate::error::{Error, Result};
use crate::io::{Read, Seek};
use crate::meta::field::{Sample, Value};
use crate::meta::layer::Layer;

/// Decides which tile to drop when a bounded cache overflows.
/// The cache itself only depends on this strategy surface,
/// so any policy implementing it can be plugged in.
pub trait EvictionPolicy: std::fmt::Debug + Send {

    /// The largest number of tiles the cache may hold.
    fn max_in_cache(&self) -> usize;

    /// Record that a tile was inserted.
    /// Returns the tile to evict, if the cache would now overflow.
    fn add(&mut self, tile: usize) -> Option<usize>;

    /// Record that a cached tile was used.
    fn access(&mut self, tile: usize);
}

/// Evicts the tile that has been cached the longest,
/// regardless of how often it was used.
#[derive(Debug)]
pub struct FifoEviction {
    capacity: usize,
    insertion_order: VecDeque<usize>,
}

/// Evicts the tile with the fewest recorded accesses.
/// Ties are broken arbitrarily.
#[derive(Debug)]
pub struct LfuEviction {
    capacity: usize,
    access_counts: HashMap<usize, u64>,
}

impl FifoEviction {

    /// A first-in-first-out policy holding at most `capacity` tiles.
    pub fn new(capacity: usize) -> Self {
        FifoEviction { capacity, insertion_order: VecDeque::with_capacity(capacity) }
    }
}

impl EvictionPolicy for FifoEviction {
    fn max_in_cache(&self) -> usize { self.capacity }

    fn add(&mut self, tile: usize) -> Option<usize> {
        self.insertion_order.push_back(tile);

        if self.insertion_order.len() > self.capacity {
            self.insertion_order.pop_front()
        }
        else { None }
    }

    fn access(&mut self, _tile: usize) {}
}

impl LfuEviction {

    /// A least-frequently-used policy holding at most `capacity` tiles.
    pub fn new(capacity: usize) -> Self {
        LfuEviction { capacity, access_counts: HashMap::with_capacity(capacity) }
    }
}

impl EvictionPolicy for LfuEviction {
    fn max_in_cache(&self) -> usize { self.capacity }

    fn add(&mut self, tile: usize) -> Option<usize> {
        if self.capacity == 0 {
            return Some(tile);
        }

        let evicted =
            if self.access_counts.len() >= self.capacity {
                // evict the coldest of the tiles that were already present
                let coldest = self.access_counts.iter()
                    .min_by_key(|(_, &count)| count)
                    .map(|(&tile, _)| tile);

                if let Some(coldest) = coldest { self.access_counts.remove(&coldest); }
                coldest
            }
            else { None };

        self.access_counts.insert(tile, 0);
        evicted
    }

    fn access(&mut self, tile: usize) {
        if let Some(count) = self.access_counts.get_mut(&tile) {
            *count += 1;
        }
    }
}

/// Random access into one layer through a bounded tile cache.
///
/// The cache owns the stream: readers on multiple threads must not
/// seek a shared stream themselves, so all tile loads funnel through
/// the stream lock here. Tile loads are atomic, a tile is either fully
/// cached or absent, and a failed load leaves no cache entry.
pub struct LayerReadCache<S> {
    layer: Layer,
    byte_order: ByteOrder,
    stream: Mutex<S>,
    tiles: RwLock<HashMap<usize, Arc<[u8]>>>,
    policy: Mutex<Box<dyn EvictionPolicy>>,
}

impl<S: Read + Seek> std::fmt::Debug for LayerReadCache<S> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("LayerReadCache")
            .field("layer", &self.layer.name)
            .field("cached_tiles", &self.cached_tile_count())
            .finish_non_exhaustive()
    }
}

impl<S: Read + Seek> LayerReadCache<S> {

    /// Cache tiles of the specified layer with a custom eviction policy.
    /// The byte order must be the one declared by the file header.
    pub fn new(stream: S, byte_order: ByteOrder, layer: Layer, policy: Box<dyn EvictionPolicy>) -> Self {
        LayerReadCache {
            layer, byte_order,
            stream: Mutex::new(stream),
            tiles: RwLock::new(HashMap::new()),
            policy: Mutex::new(policy),
        }
    }

    /// Cache up to `capacity` tiles, evicting in insertion order.
    pub fn with_fifo(stream: S, byte_order: ByteOrder, layer: Layer, capacity: usize) -> Self {
        Self::new(stream, byte_order, layer, Box::new(FifoEviction::new(capacity)))
    }

    /// Cache up to `capacity` tiles, evicting the least frequently used.
    pub fn with_lfu(stream: S, byte_order: ByteOrder, layer: Layer, capacity: usize) -> Self {
        Self::new(stream, byte_order, layer, Box::new(LfuEviction::new(capacity)))
    }

    /// The layer this cache reads from.
    pub fn layer(&self) -> &Layer { &self.layer }

    /// Number of tiles currently held in memory.
    pub fn cached_tile_count(&self) -> usize {
        self.tiles.read().expect("poisoned tile map").len()
    }

    /// Recover the underlying stream, dropping all cached tiles.
    pub fn into_stream(self) -> S {
        self.stream.into_inner().expect("poisoned stream lock")
    }

    /// The decompressed payload of one stored tile,
    /// loaded through the cache.
    pub fn tile(&self, stored_tile: usize) -> Result<Arc<[u8]>> {
        if let Some(bytes) = self.tiles.read().expect("poisoned tile map").get(&stored_tile) {
            self.policy.lock().expect("poisoned policy lock").access(stored_tile);
            return Ok(bytes.clone());
        }

        // serialize misses: concurrent misses on the same tile wait here
        // and find the tile already cached by whoever loaded it first
        let mut stream = self.stream.lock().expect("poisoned stream lock");

        if let Some(bytes) = self.tiles.read().expect("poisoned tile map").get(&stored_tile) {
            self.policy.lock().expect("poisoned policy lock").access(stored_tile);
            return Ok(bytes.clone());
        }

        tracing::trace!(layer = self.layer.name.as_str(), stored_tile, "tile cache miss");
        let bytes: Arc<[u8]> = self.layer.read_tile(&mut *stream, stored_tile)?.into();

        let mut tiles = self.tiles.write().expect("poisoned tile map");
        tiles.insert(stored_tile, bytes.clone());

        if let Some(evicted) = self.policy.lock().expect("poisoned policy lock").add(stored_tile) {
            tracing::trace!(layer = self.layer.name.as_str(), evicted, "tile cache eviction");
            tiles.remove(&evicted);
        }

        Ok(bytes)
    }

    /// The complete sample at a coordinate.
    pub fn sample_at(&self, coordinate: &[usize]) -> Result<Sample> {
        let selector = self.layer.dimensions.tile_selector(coordinate)?;

        (0 .. self.layer.fields.len())
            .map(|field_index| self.value_at(selector.tile, selector.in_tile, field_index))
            .collect()
    }

    /// One field value of the sample at a coordinate.
    pub fn field_at(&self, coordinate: &[usize], field_index: usize) -> Result<Value> {
        if field_index >= self.layer.fields.len() {
            return Err(Error::bounds("field index outside the field set"));
        }

        let selector = self.layer.dimensions.tile_selector(coordinate)?;
        self.value_at(selector.tile, selector.in_tile, field_index)
    }

    fn value_at(&self, logical_tile: usize, in_tile: usize, field_index: usize) -> Result<Value> {
        let stored_tile = self.layer.stored_tile_of(logical_tile, field_index);
        let bytes = self.tile(stored_tile)?;

        let offset = self.layer.value_byte_offset(in_tile, field_index);
        let kind = self.layer.fields.list[field_index].kind;
        kind.value_from_bytes(self.byte_order, &bytes[offset ..])
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::compression::Compression;
    use crate::meta::dimension::{Dimension, DimensionSet};
    use crate::meta::field::{Field, FieldSet, FieldType};
    use std::io::Cursor;

    #[test]
    fn fifo_evicts_in_insertion_order() {
        let mut fifo = FifoEviction::new(2);

        assert_eq!(fifo.add(10), None);
        assert_eq!(fifo.add(11), None);

        fifo.access(10); // fifo ignores accesses
        assert_eq!(fifo.add(12), Some(10));
        assert_eq!(fifo.add(13), Some(11));
    }

    #[test]
    fn lfu_evicts_the_coldest_tile() {
        let mut lfu = LfuEviction::new(2);

        assert_eq!(lfu.add(10), None);
        assert_eq!(lfu.add(11), None);

        lfu.access(10);
        lfu.access(10);
        lfu.access(11);

        // 11 is strictly colder than 10, so it must go
        assert_eq!(lfu.add(12), Some(11));

        // 12 has never been accessed, 10 twice
        assert_eq!(lfu.add(13), Some(12));
    }

    #[test]
    fn zero_capacity_policies_hold_nothing() {
        let mut fifo = FifoEviction::new(0);
        assert_eq!(fifo.add(1), Some(1));

        let mut lfu = LfuEviction::new(0);
        assert_eq!(lfu.add(1), Some(1));
    }

    /// A one-field u8 layer of 8x4 samples in 2x2 tiles, where every
    /// sample value equals its sample index, laid out in a fake file.
    fn example_file() -> (Layer, Vec<u8>) {
        let mut layer = Layer::new(
            "values",
            DimensionSet::new(vec![
                Dimension::new("x", 8, 2).unwrap(),
                Dimension::new("y", 4, 2).unwrap(),
            ]),
            FieldSet::new(vec![Field::new("v", FieldType::U8)]),
            false,
            Compression::None,
        ).unwrap();

        let mut file = vec![0_u8; 64]; // pretend a header lives here

        for (tile_index, tile) in layer.dimensions.tile_coordinates().enumerate() {
            let mut payload = vec![0_u8; layer.uncompressed_tile_byte_count(tile_index)];

            for coordinate in layer.dimensions.tile_sample_coordinates(&tile) {
                let selector = layer.dimensions.tile_selector(&coordinate).unwrap();
                let sample_index = layer.dimensions.sample_index(&coordinate).unwrap();
                payload[selector.in_tile] = sample_index as u8;
            }

            layer.tile_offsets[tile_index] = file.len() as u64;
            layer.tile_bytes[tile_index] = payload.len() as u64;
            file.extend_from_slice(&payload);
        }

        (layer, file)
    }

    #[test]
    fn samples_read_through_the_cache() {
        let (layer, file) = example_file();
        let cache = LayerReadCache::with_fifo(Cursor::new(file), ByteOrder::LittleEndian, layer, 4);

        for coordinate in cache.layer().dimensions.sample_coordinates().collect::<Vec<_>>() {
            let expected = cache.layer().dimensions.sample_index(&coordinate).unwrap() as u8;
            assert_eq!(cache.sample_at(&coordinate).unwrap().as_slice(), &[Value::U8(expected)]);
            assert_eq!(cache.field_at(&coordinate, 0).unwrap(), Value::U8(expected));
        }
    }

    #[test]
    fn cache_never_exceeds_its_capacity() {
        let (layer, file) = example_file();

        for capacity in [1, 2, 3] {
            let cache = LayerReadCache::with_lfu(Cursor::new(file.clone()), ByteOrder::LittleEndian, layer.clone(), capacity);

            for coordinate in cache.layer().dimensions.sample_coordinates().collect::<Vec<_>>() {
                cache.sample_at(&coordinate).unwrap();
                assert!(cache.cached_tile_count() <= capacity);
            }
        }
    }

    #[test]
    fn out_of_bounds_access_is_rejected_without_touching_the_stream() {
        let (layer, file) = example_file();
        let cache = LayerReadCache::with_fifo(Cursor::new(file), ByteOrder::LittleEndian, layer, 4);

        assert!(matches!(cache.sample_at(&[8, 0]), Err(Error::Bounds(_))));
        assert!(matches!(cache.field_at(&[0, 0], 1), Err(Error::Bounds(_))));
        assert_eq!(cache.cached_tile_count(), 0);
    }

    #[test]
    fn failed_tile_loads_leave_no_cache_entry() {
        let (mut layer, file) = example_file();
        layer.tile_bytes[0] = 100_000; // points past the end of the file

        let cache = LayerReadCache::with_fifo(Cursor::new(file), ByteOrder::LittleEndian, layer, 4);
        assert!(cache.sample_at(&[0, 0]).is_err());
        assert_eq!(cache.cached_tile_count(), 0);

        // other tiles remain readable
        assert!(cache.sample_at(&[2, 0]).is_ok());
        assert_eq!(cache.cached_tile_count(), 1);
    }

    #[test]
    fn concurrent_readers_share_one_cache() {
        let (layer, file) = example_file();
        let cache = Arc::new(LayerReadCache::with_fifo(Cursor::new(file), ByteOrder::LittleEndian, layer, 16));

        let workers: Vec<_> = (0 .. 4).map(|_| {
            let cache = Arc::clone(&cache);

            std::thread::spawn(move || {
                for coordinate in cache.layer().dimensions.sample_coordinates().collect::<Vec<_>>() {
                    let expected = cache.layer().dimensions.sample_index(&coordinate).unwrap() as u8;
                    assert_eq!(cache.field_at(&coordinate, 0).unwrap(), Value::U8(expected));
                }
            })
        }).collect();

        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn planar_layers_load_one_plane_per_field() {
        let mut layer = Layer::new(
            "planar",
            DimensionSet::new(vec![Dimension::new("x", 4, 2).unwrap()]),
            FieldSet::new(vec![
                Field::new("a", FieldType::U8),
                Field::new("b", FieldType::U16),
            ]),
            true,
            Compression::None,
        ).unwrap();

        let mut file = vec![0_u8; 16];

        for stored_tile in 0 .. layer.stored_tile_count() {
            let field = layer.field_of_stored_tile(stored_tile);
            let logical = layer.logical_tile_of(stored_tile);

            let payload: Vec<u8> = match field {
                0 => (0 .. 2).map(|position| (logical * 2 + position) as u8).collect(),
                _ => (0 .. 2).flat_map(|position| (100 + (logical * 2 + position) as u16).to_le_bytes()).collect(),
            };

            layer.tile_offsets[stored_tile] = file.len() as u64;
            layer.tile_bytes[stored_tile] = payload.len() as u64;
            file.extend_from_slice(&payload);
        }

        let cache = LayerReadCache::with_fifo(Cursor::new(file), ByteOrder::LittleEndian, layer, 8);

        for x in 0 .. 4 {
            let sample = cache.sample_at(&[x]).unwrap();
            assert_eq!(sample.as_slice(), &[Value::U8(x as u8), Value::U16(100 + x as u16)]);
        }
    }
}
