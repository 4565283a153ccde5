
//! Read and write pixi files: a binary container format for
//! n-dimensional, multi-field raster data, organized into tiles that
//! may be independently compressed.
//!
//! A file holds any number of layers, each with its own dimensions,
//! field schema, storage layout and compression, plus a chain of
//! `{key → value}` tag sections. Files are read from local paths or
//! from http servers that support byte-range requests.

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,
)]

#![deny(
    unused_variables,
    unused_assignments,
    unused_must_use,
    trivial_numeric_casts,
)]

#![forbid(unsafe_code)]

pub mod error;
pub mod io;
pub mod encoding;
pub mod meta;
pub mod compression;
pub mod cache;
pub mod tile;
pub mod pipeline;

#[macro_use]
extern crate smallvec;

/// Re-exports of all types commonly required
/// for simple reading and writing of a pixi file.
pub mod prelude {

    // main exports
    pub use crate::meta::{append_tags, Pixi, PixiHeader};
    pub use crate::tile::read::TileSamplesReader;
    pub use crate::tile::write::{write_pixi_with, LayerWriter, PixiWriter};
    pub use crate::cache::{FifoEviction, LayerReadCache, LfuEviction};

    // secondary data types
    pub use crate::compression::Compression;
    pub use crate::encoding::{ByteOrder, Encoding, OffsetSize};
    pub use crate::meta::dimension::{Dimension, DimensionSet, SampleCoordinate, TileSelector};
    pub use crate::meta::field::{Field, FieldSet, FieldType, Sample, Value};
    pub use crate::meta::layer::{Layer, LayerHandle};
    pub use crate::meta::tags::TagMap;

    pub use crate::error::{Error, Result, UnitResult};
}
