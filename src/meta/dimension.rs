
//! Dimensions and the coordinate algebra of tiled n-dimensional volumes.
//!
//! A layer stores its samples in row-major order with the *first*
//! declared dimension varying fastest. Tiling splits every dimension
//! into `ceil(size / tile_size)` tiles; tiles at the upper edge may be
//! logically truncated, and the in-tile linearization uses those
//! truncated extents so that the valid samples of an edge tile pack
//! densely at the start of its buffer.

use smallvec::SmallVec;

use crate::encoding::Encoding;
use crate::error::{u64_to_usize, usize_to_u64, Error, Result, UnitResult};
use crate::io::{Read, Write};

/// List of dimensions. Most volumes have at most four.
pub type DimensionList = SmallVec<[Dimension; 4]>;

/// Position of one sample in the logical volume, one entry per dimension.
pub type SampleCoordinate = SmallVec<[usize; 4]>;

/// Position of one tile in the tile grid, one entry per dimension.
pub type TileCoordinate = SmallVec<[usize; 4]>;

/// Position of one sample inside its tile, one entry per dimension.
pub type InTileCoordinate = SmallVec<[usize; 4]>;

/// One axis of a layer volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {

    /// Axis name, for example `"x"` or `"time"`.
    pub name: String,

    /// Number of samples along this axis. May be zero.
    pub size: usize,

    /// Number of samples per tile along this axis. Never zero.
    pub tile_size: usize,
}

/// Locates one sample within the flat tile storage of a layer:
/// which tile it lives in, and its linear position inside that tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileSelector {

    /// Linear index of the tile in the tile grid.
    pub tile: usize,

    /// Linear index of the sample within the (possibly truncated) tile.
    pub in_tile: usize,
}

impl Dimension {

    /// Create a dimension, validating the tile size.
    pub fn new(name: impl Into<String>, size: usize, tile_size: usize) -> Result<Self> {
        if tile_size == 0 {
            return Err(Error::format("dimension tile size must not be zero"));
        }

        Ok(Dimension { name: name.into(), size, tile_size })
    }

    /// Number of tiles along this axis. Zero-size axes have zero tiles.
    pub fn tiles(&self) -> usize {
        // round up, because if the axis is not evenly divisible by the tiles,
        // we add another tile at the end (which is only partially used)
        (self.size + self.tile_size - 1) / self.tile_size
    }

    /// The truncated sample count of the specified tile along this axis.
    /// Equals `tile_size` everywhere except possibly the last tile.
    pub fn tile_extent(&self, tile: usize) -> usize {
        debug_assert!(tile < self.tiles(), "tile coordinate out of grid");
        self.tile_size.min(self.size - tile * self.tile_size)
    }

    /// Read one dimension description from a layer header.
    pub fn read(encoding: Encoding, read: &mut impl Read) -> Result<Self> {
        let name = encoding.read_string(read)?;
        let size = u64_to_usize(encoding.read_offset(read)?);
        let tile_size = u64_to_usize(encoding.read_offset(read)?);

        Dimension::new(name, size, tile_size)
    }

    /// Write one dimension description into a layer header.
    pub fn write(&self, encoding: Encoding, write: &mut impl Write) -> UnitResult {
        encoding.write_string(write, &self.name)?;
        encoding.write_offset(write, usize_to_u64(self.size))?;
        encoding.write_offset(write, usize_to_u64(self.tile_size))?;
        Ok(())
    }

    /// The number of bytes `write` will emit for this dimension description.
    pub fn header_byte_count(&self, encoding: Encoding) -> usize {
        encoding.string_byte_count(&self.name) + 2 * encoding.offset_size.byte_count()
    }
}

/// The ordered dimensions of one layer.
/// The declaration order is significant: it defines the linearization
/// of both sample indices and tile indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DimensionSet {

    /// The axes, in declaration order.
    pub list: DimensionList,
}

impl DimensionSet {

    /// Group dimensions into a set.
    pub fn new(list: impl Into<DimensionList>) -> Self {
        DimensionSet { list: list.into() }
    }

    /// Number of axes.
    pub fn len(&self) -> usize { self.list.len() }

    /// Whether there are no axes at all.
    pub fn is_empty(&self) -> bool { self.list.is_empty() }

    /// Iterate over the axes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Dimension> { self.list.iter() }

    /// Total number of samples in the logical volume.
    pub fn sample_count(&self) -> usize {
        self.list.iter().map(|dimension| dimension.size).product()
    }

    /// Total number of tiles in the tile grid.
    pub fn tile_count(&self) -> usize {
        self.list.iter().map(Dimension::tiles).product()
    }

    /// Number of samples in a full (untruncated) tile shape.
    pub fn tile_sample_count(&self) -> usize {
        self.list.iter().map(|dimension| dimension.tile_size).product()
    }

    /// Whether the coordinate lies inside the logical volume.
    pub fn contains_coordinate(&self, coordinate: &[usize]) -> bool {
        coordinate.len() == self.list.len()
            && coordinate.iter().zip(self.list.iter())
                .all(|(&position, dimension)| position < dimension.size)
    }

    /// Linearize a sample coordinate, first dimension fastest.
    pub fn sample_index(&self, coordinate: &[usize]) -> Result<usize> {
        if !self.contains_coordinate(coordinate) {
            return Err(Error::bounds("sample coordinate outside the volume"));
        }

        let mut index = 0;
        let mut stride = 1;

        for (&position, dimension) in coordinate.iter().zip(self.list.iter()) {
            index += position * stride;
            stride *= dimension.size;
        }

        Ok(index)
    }

    /// The inverse of `sample_index`.
    pub fn sample_coordinate_of(&self, mut sample_index: usize) -> SampleCoordinate {
        debug_assert!(sample_index < self.sample_count(), "sample index out of volume");
        let mut coordinate = SampleCoordinate::with_capacity(self.list.len());

        for dimension in self.list.iter() {
            coordinate.push(sample_index % dimension.size);
            sample_index /= dimension.size;
        }

        coordinate
    }

    /// The per-dimension tile grid position containing a sample coordinate.
    pub fn tile_coordinate(&self, coordinate: &[usize]) -> TileCoordinate {
        coordinate.iter().zip(self.list.iter())
            .map(|(&position, dimension)| position / dimension.tile_size)
            .collect()
    }

    /// The per-dimension position of a sample inside its tile.
    pub fn in_tile_coordinate(&self, coordinate: &[usize]) -> InTileCoordinate {
        coordinate.iter().zip(self.list.iter())
            .map(|(&position, dimension)| position % dimension.tile_size)
            .collect()
    }

    /// Linearize a tile grid position, first dimension fastest.
    pub fn tile_index(&self, tile_coordinate: &[usize]) -> usize {
        debug_assert_eq!(tile_coordinate.len(), self.list.len(), "tile coordinate dimensionality");

        let mut index = 0;
        let mut stride = 1;

        for (&tile, dimension) in tile_coordinate.iter().zip(self.list.iter()) {
            index += tile * stride;
            stride *= dimension.tiles();
        }

        index
    }

    /// The inverse of `tile_index`.
    pub fn tile_coordinate_of(&self, mut tile_index: usize) -> TileCoordinate {
        debug_assert!(tile_index < self.tile_count(), "tile index out of grid");
        let mut coordinate = TileCoordinate::with_capacity(self.list.len());

        for dimension in self.list.iter() {
            let tiles = dimension.tiles();
            coordinate.push(tile_index % tiles);
            tile_index /= tiles;
        }

        coordinate
    }

    /// Linearize an in-tile position, first dimension fastest,
    /// using the truncated extents of the containing tile.
    /// Valid samples of an edge tile therefore occupy a dense prefix
    /// of the indices `0 .. clipped_tile_sample_count`.
    pub fn in_tile_index(&self, in_tile: &[usize], tile_coordinate: &[usize]) -> usize {
        let mut index = 0;
        let mut stride = 1;

        for ((&position, &tile), dimension) in in_tile.iter().zip(tile_coordinate.iter()).zip(self.list.iter()) {
            index += position * stride;
            stride *= dimension.tile_extent(tile);
        }

        index
    }

    /// The inverse of `in_tile_index`: the absolute sample coordinate
    /// of the specified linear position inside a tile.
    pub fn tile_sample_coordinate_of(&self, tile_coordinate: &[usize], mut in_tile_index: usize) -> SampleCoordinate {
        debug_assert!(in_tile_index < self.clipped_tile_sample_count(tile_coordinate), "in-tile index out of tile");
        let mut coordinate = SampleCoordinate::with_capacity(self.list.len());

        for (&tile, dimension) in tile_coordinate.iter().zip(self.list.iter()) {
            let extent = dimension.tile_extent(tile);
            coordinate.push(tile * dimension.tile_size + in_tile_index % extent);
            in_tile_index /= extent;
        }

        coordinate
    }

    /// Number of samples actually contained in the specified tile,
    /// accounting for truncation at the volume edge.
    pub fn clipped_tile_sample_count(&self, tile_coordinate: &[usize]) -> usize {
        tile_coordinate.iter().zip(self.list.iter())
            .map(|(&tile, dimension)| dimension.tile_extent(tile))
            .product()
    }

    /// Split a sample coordinate into its linear tile index
    /// and its linear in-tile index.
    pub fn tile_selector(&self, coordinate: &[usize]) -> Result<TileSelector> {
        if !self.contains_coordinate(coordinate) {
            return Err(Error::bounds("sample coordinate outside the volume"));
        }

        let tile_coordinate = self.tile_coordinate(coordinate);
        let in_tile_coordinate = self.in_tile_coordinate(coordinate);

        Ok(TileSelector {
            tile: self.tile_index(&tile_coordinate),
            in_tile: self.in_tile_index(&in_tile_coordinate, &tile_coordinate),
        })
    }

    /// Enumerate the whole logical volume in sample-index order.
    pub fn sample_coordinates(&self) -> impl Iterator<Item = SampleCoordinate> {
        GridIndices::new(self.list.iter().map(|dimension| dimension.size).collect())
    }

    /// Enumerate the tile grid in tile-index order.
    pub fn tile_coordinates(&self) -> impl Iterator<Item = TileCoordinate> {
        GridIndices::new(self.list.iter().map(Dimension::tiles).collect())
    }

    /// Enumerate the absolute sample coordinates contained in one tile,
    /// in in-tile-index order. Truncated positions of edge tiles
    /// are not visited.
    pub fn tile_sample_coordinates(&self, tile_coordinate: &[usize]) -> impl Iterator<Item = SampleCoordinate> {
        let origins: SampleCoordinate = tile_coordinate.iter().zip(self.list.iter())
            .map(|(&tile, dimension)| tile * dimension.tile_size)
            .collect();

        let extents: SampleCoordinate = tile_coordinate.iter().zip(self.list.iter())
            .map(|(&tile, dimension)| dimension.tile_extent(tile))
            .collect();

        GridIndices::new(extents).map(move |in_tile|
            in_tile.iter().zip(origins.iter())
                .map(|(&position, &origin)| origin + position)
                .collect()
        )
    }
}

/// Odometer over an n-dimensional index grid,
/// first dimension varying fastest.
/// Yields nothing if any extent is zero.
struct GridIndices {
    extents: SmallVec<[usize; 4]>,
    next: Option<SmallVec<[usize; 4]>>,
}

impl GridIndices {
    fn new(extents: SmallVec<[usize; 4]>) -> Self {
        let next =
            if extents.iter().any(|&extent| extent == 0) { None }
            else { Some(smallvec![0; extents.len()]) };

        GridIndices { extents, next }
    }
}

impl Iterator for GridIndices {
    type Item = SmallVec<[usize; 4]>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.clone()?;

        // advance the odometer, first dimension fastest
        let mut advanced = false;
        if let Some(indices) = self.next.as_mut() {
            for (index, &extent) in indices.iter_mut().zip(self.extents.iter()) {
                *index += 1;
                if *index < extent { advanced = true; break; }
                *index = 0;
            }
        }

        if !advanced { self.next = None; }
        Some(current)
    }
}
