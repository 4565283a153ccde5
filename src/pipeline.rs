
//! Whole-file operations built on the read and write contracts:
//! re-encoding compression, retiling, merging, stitching, resampling,
//! and tag editing. Command-line front-ends consume these functions;
//! the functions themselves never print or exit.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::ops::Range;

use smallvec::SmallVec;

use crate::cache::LayerReadCache;
use crate::compression::Compression;
use crate::error::{Error, Result, UnitResult};
use crate::io::{self, Read, Seek, Write};
use crate::meta::dimension::{Dimension, DimensionSet, SampleCoordinate};
use crate::meta::field::{FieldSet, FieldType, Sample, Value};
use crate::meta::layer::Layer;
use crate::meta::tags::TagMap;
use crate::meta::{self, Pixi};
use crate::tile::write::{write_pixi_with, LayerWriter, PixiWriter};

/// How many decompressed tiles each random-access pass keeps in memory.
/// Retiling and stitching revisit source tiles in a sliding pattern,
/// so a few dozen tiles cover the working set of typical tile shapes.
const PIPELINE_CACHE_TILES: usize = 32;

/// How one output sample is derived from its source neighborhood
/// when resampling to a smaller grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleMethod {

    /// The largest value of the neighborhood, per field.
    Max,

    /// The smallest value of the neighborhood, per field.
    Min,

    /// The arithmetic mean, rounded half to even for integer fields.
    Mean,

    /// The middle value; the mean of the two middle values
    /// when the neighborhood has an even sample count.
    Median,

    /// The first sample of the neighborhood in iteration order.
    First,

    /// The sample in the middle of the neighborhood.
    Center,
}

/// Copy a file, re-encoding every tile payload with a new compression
/// method. Layer schemas, sample bytes and tags are preserved.
pub fn copy_with_compression<S: Read + Seek, W: Write + Seek>(
    source: &mut S,
    destination: W,
    compression: Compression,
) -> Result<W> {
    let pixi = Pixi::read_from_buffered(source)?;

    write_pixi_with(destination, pixi.header.encoding, |writer| {
        copy_tag_sections(&pixi, writer)?;

        for source_layer in &pixi.layers {
            let layer = Layer::new(
                source_layer.name.clone(),
                source_layer.dimensions.clone(),
                source_layer.fields.clone(),
                source_layer.separated,
                compression,
            )?;

            writer.write_layer(layer, |layer_writer| {
                copy_layer_tiles(source, source_layer, layer_writer)
            })?;
        }

        Ok(())
    })
}

/// Copy a file, re-tiling the named layer to new per-dimension tile
/// sizes. All other layers are copied unchanged. Samples are preserved.
pub fn retile<S: Read + Seek, W: Write + Seek>(
    source: &mut S,
    destination: W,
    layer_name: &str,
    tile_sizes: &[usize],
) -> Result<W> {
    let pixi = Pixi::read_from_buffered(source)?;

    if pixi.layer(layer_name).is_none() {
        return Err(Error::usage("no layer with the specified name"));
    }

    write_pixi_with(destination, pixi.header.encoding, |writer| {
        copy_tag_sections(&pixi, writer)?;

        for source_layer in &pixi.layers {
            if source_layer.name != layer_name {
                let layer = Layer::new(
                    source_layer.name.clone(),
                    source_layer.dimensions.clone(),
                    source_layer.fields.clone(),
                    source_layer.separated,
                    source_layer.compression,
                )?;

                writer.write_layer(layer, |layer_writer| {
                    copy_layer_tiles(source, source_layer, layer_writer)
                })?;

                continue;
            }

            if tile_sizes.len() != source_layer.dimensions.len() {
                return Err(Error::usage("one tile size per dimension is required"));
            }

            let dimensions = DimensionSet::new(
                source_layer.dimensions.iter().zip(tile_sizes)
                    .map(|(dimension, &tile_size)| Dimension::new(dimension.name.clone(), dimension.size, tile_size))
                    .collect::<Result<Vec<_>>>()?
            );

            let layer = Layer::new(
                source_layer.name.clone(),
                dimensions,
                source_layer.fields.clone(),
                source_layer.separated,
                source_layer.compression,
            )?;

            // the new tile order visits source tiles in a sliding
            // pattern, so read through a bounded cache
            let cache = LayerReadCache::with_fifo(
                &mut *source,
                pixi.header.encoding.byte_order,
                source_layer.clone(),
                PIPELINE_CACHE_TILES,
            );

            writer.write_layer(layer, |layer_writer| {
                layer_writer.write_samples(|coordinate| cache.sample_at(coordinate))
            })?;
        }

        Ok(())
    })
}

/// Join files by concatenating the field schemas of corresponding
/// layers. Every file must contribute the same number of layers, with
/// identical dimension sizes; names, tile shapes and compression come
/// from the first file. Tag sets union, later files win on collisions.
pub fn merge<S: Read + Seek, W: Write + Seek>(
    sources: &mut [S],
    destination: W,
) -> Result<W> {
    let summaries = read_all_summaries(sources)?;
    let first = &summaries[0];

    if summaries.iter().any(|pixi| pixi.layers.len() != first.layers.len()) {
        return Err(Error::usage("all merged files must have the same layer count"));
    }

    for layer_index in 0 .. first.layers.len() {
        let sizes = |pixi: &Pixi| pixi.layers[layer_index].dimensions.iter()
            .map(|dimension| dimension.size).collect::<Vec<_>>();

        if summaries.iter().any(|pixi| sizes(pixi) != sizes(first)) {
            return Err(Error::usage("merged layers must have matching dimensions"));
        }
    }

    let merged_tags = union_tags(&summaries);
    let encoding = first.header.encoding;

    write_pixi_with(destination, encoding, |writer| {
        writer.write_tags(merged_tags)?;

        for layer_index in 0 .. summaries[0].layers.len() {
            let template = &summaries[0].layers[layer_index];

            // concatenate the field schemas of all files
            let mut fields = FieldSet::default();
            for pixi in &summaries {
                fields.list.extend(pixi.layers[layer_index].fields.list.iter().cloned());
            }

            let layer = Layer::new(
                template.name.clone(),
                template.dimensions.clone(),
                fields,
                template.separated,
                template.compression,
            )?;

            let caches = layer_caches(&mut *sources, &summaries, layer_index)?;

            writer.write_layer(layer, |layer_writer| {
                layer_writer.write_samples(|coordinate| {
                    let mut sample = Sample::new();
                    for cache in &caches {
                        sample.extend(cache.sample_at(coordinate)?);
                    }

                    Ok(sample)
                })
            })?;
        }

        Ok(())
    })
}

/// Join files by concatenating sizes along one dimension. Every file
/// must contribute the same number of layers, with identical field
/// schemas and identical sizes in all other dimensions. Tag sets
/// union, later files win on collisions.
pub fn stitch<S: Read + Seek, W: Write + Seek>(
    sources: &mut [S],
    destination: W,
    dimension_index: usize,
) -> Result<W> {
    let summaries = read_all_summaries(sources)?;
    let first = &summaries[0];

    if summaries.iter().any(|pixi| pixi.layers.len() != first.layers.len()) {
        return Err(Error::usage("all stitched files must have the same layer count"));
    }

    for layer_index in 0 .. first.layers.len() {
        let template = &first.layers[layer_index];

        if dimension_index >= template.dimensions.len() {
            return Err(Error::usage("stitch dimension outside the dimension set"));
        }

        for pixi in &summaries {
            let layer = &pixi.layers[layer_index];

            let schemas_match = layer.fields == template.fields
                && layer.dimensions.len() == template.dimensions.len()
                && layer.dimensions.iter().zip(template.dimensions.iter()).enumerate()
                    .all(|(index, (dimension, expected))| index == dimension_index || dimension.size == expected.size);

            if !schemas_match {
                return Err(Error::usage("stitched layers must differ only along the stitch dimension"));
            }
        }
    }

    let merged_tags = union_tags(&summaries);
    let encoding = first.header.encoding;

    write_pixi_with(destination, encoding, |writer| {
        writer.write_tags(merged_tags)?;

        for layer_index in 0 .. summaries[0].layers.len() {
            let template = &summaries[0].layers[layer_index];

            // the stitched extent is the sum of all source extents
            let source_extents: Vec<usize> = summaries.iter()
                .map(|pixi| pixi.layers[layer_index].dimensions.list[dimension_index].size)
                .collect();

            let mut dimensions = template.dimensions.clone();
            dimensions.list[dimension_index].size = source_extents.iter().sum();

            let layer = Layer::new(
                template.name.clone(),
                dimensions,
                template.fields.clone(),
                template.separated,
                template.compression,
            )?;

            let caches = layer_caches(&mut *sources, &summaries, layer_index)?;

            writer.write_layer(layer, |layer_writer| {
                layer_writer.write_samples(|coordinate| {
                    // walk the cumulative extents to find the source file
                    let mut position = coordinate[dimension_index];
                    let mut source_index = 0;

                    while position >= source_extents[source_index] {
                        position -= source_extents[source_index];
                        source_index += 1;
                    }

                    let mut local: SampleCoordinate = coordinate.clone();
                    local[dimension_index] = position;
                    caches[source_index].sample_at(&local)
                })
            })?;
        }

        Ok(())
    })
}

/// Resample every layer of a file to a smaller grid. Each output
/// sample is derived from its source neighborhood by the specified
/// method. The factor must be in `(0, 1]`.
pub fn decimate<S: Read + Seek, W: Write + Seek>(
    source: &mut S,
    destination: W,
    factor: f64,
    method: ResampleMethod,
) -> Result<W> {
    if !(factor > 0.0 && factor <= 1.0) {
        return Err(Error::usage("decimation factor must be in (0, 1]"));
    }

    let pixi = Pixi::read_from_buffered(source)?;

    write_pixi_with(destination, pixi.header.encoding, |writer| {
        copy_tag_sections(&pixi, writer)?;

        for source_layer in &pixi.layers {
            let dimensions = DimensionSet::new(
                source_layer.dimensions.iter()
                    .map(|dimension| Dimension::new(
                        dimension.name.clone(),
                        scaled_size(dimension.size, factor),
                        dimension.tile_size,
                    ))
                    .collect::<Result<Vec<_>>>()?
            );

            let layer = Layer::new(
                source_layer.name.clone(),
                dimensions,
                source_layer.fields.clone(),
                source_layer.separated,
                source_layer.compression,
            )?;

            let input_sizes: Vec<usize> = source_layer.dimensions.iter().map(|dimension| dimension.size).collect();
            let output_sizes: Vec<usize> = layer.dimensions.iter().map(|dimension| dimension.size).collect();
            let field_kinds: Vec<FieldType> = layer.fields.iter().map(|field| field.kind).collect();

            let cache = LayerReadCache::with_fifo(
                &mut *source,
                pixi.header.encoding.byte_order,
                source_layer.clone(),
                PIPELINE_CACHE_TILES,
            );

            writer.write_layer(layer, |layer_writer| {
                layer_writer.write_samples(|coordinate| {
                    let block: Vec<Range<usize>> = coordinate.iter().enumerate()
                        .map(|(dimension, &position)| block_range(position, input_sizes[dimension], output_sizes[dimension]))
                        .collect();

                    resample_block(&cache, &block, method, &field_kinds)
                })
            })?;
        }

        Ok(())
    })
}

/// The combined tags of a file, read from a path or url.
pub fn read_tags(address: &str) -> Result<BTreeMap<String, String>> {
    let pixi = Pixi::read_from_address(address)?;

    Ok(pixi.all_tags().into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect())
}

/// Append a tag section to a local file in place.
/// Files behind http addresses cannot be edited.
pub fn append_tags(address: &str, tags: TagMap) -> UnitResult {
    if io::is_url(address) {
        return Err(Error::usage("appending tags over http is not supported"));
    }

    let mut file = OpenOptions::new().read(true).write(true).open(address)?;
    meta::append_tags(&mut file, tags)
}


// ---- shared plumbing ----

/// Copy every tag section of the source file, preserving the
/// section structure instead of merging.
fn copy_tag_sections<W: Write + Seek>(pixi: &Pixi, writer: &mut PixiWriter<W>) -> UnitResult {
    for section in &pixi.tags {
        writer.write_tags(section.tags.clone())?;
    }

    Ok(())
}

/// Stream every stored tile of one layer into a destination layer of
/// identical schema, re-encoding only the compression.
fn copy_layer_tiles<S: Read + Seek, W: Write + Seek>(
    source: &mut S,
    source_layer: &Layer,
    layer_writer: &mut LayerWriter<'_, W>,
) -> UnitResult {
    for stored in crate::tile::stored_tiles(source_layer) {
        layer_writer.write_tile(source_layer.read_tile(source, stored.stored_index)?)?;
    }

    Ok(())
}

fn read_all_summaries<S: Read + Seek>(sources: &mut [S]) -> Result<Vec<Pixi>> {
    if sources.is_empty() {
        return Err(Error::usage("at least one source file is required"));
    }

    sources.iter_mut().map(Pixi::read_from_buffered).collect()
}

/// One read cache per source file, for the specified layer.
fn layer_caches<'s, S: Read + Seek>(
    sources: &'s mut [S],
    summaries: &[Pixi],
    layer_index: usize,
) -> Result<Vec<LayerReadCache<&'s mut S>>> {
    Ok(
        sources.iter_mut().zip(summaries)
            .map(|(source, pixi)| LayerReadCache::with_fifo(
                source,
                pixi.header.encoding.byte_order,
                pixi.layers[layer_index].clone(),
                PIPELINE_CACHE_TILES,
            ))
            .collect()
    )
}

/// Tags of all files combined, later files winning on collisions.
fn union_tags(summaries: &[Pixi]) -> TagMap {
    let mut merged = TagMap::new();

    for pixi in summaries {
        for (key, value) in pixi.all_tags() {
            merged.insert(key.to_owned(), value.to_owned());
        }
    }

    merged
}

/// Output grid size along one dimension.
fn scaled_size(size: usize, factor: f64) -> usize {
    if size == 0 { return 0; }
    (((size as f64) * factor).round() as usize).clamp(1, size)
}

/// The input positions contributing to one output position.
/// Partitions the input range exactly, like nearest-region resampling.
fn block_range(out_position: usize, in_size: usize, out_size: usize) -> Range<usize> {
    (out_position * in_size / out_size) .. ((out_position + 1) * in_size / out_size)
}

/// Derive one output sample from its source neighborhood.
fn resample_block<S: Read + Seek>(
    cache: &LayerReadCache<S>,
    block: &[Range<usize>],
    method: ResampleMethod,
    field_kinds: &[FieldType],
) -> Result<Sample> {
    match method {
        ResampleMethod::First => {
            let first: SampleCoordinate = block.iter().map(|range| range.start).collect();
            cache.sample_at(&first)
        },

        ResampleMethod::Center => {
            let center: SampleCoordinate = block.iter()
                .map(|range| (range.start + range.len() / 2).min(range.end - 1))
                .collect();

            cache.sample_at(&center)
        },

        _ => {
            let mut block_samples = Vec::new();
            for coordinate in block_coordinates(block) {
                block_samples.push(cache.sample_at(&coordinate)?);
            }

            field_kinds.iter().enumerate()
                .map(|(field_index, &kind)| {
                    let values: SmallVec<[Value; 16]> = block_samples.iter()
                        .map(|sample| sample[field_index])
                        .collect();

                    aggregate(method, kind, &values)
                })
                .collect()
        },
    }
}

/// Enumerate a hyper-rectangular block, first dimension fastest.
fn block_coordinates(block: &[Range<usize>]) -> Vec<SampleCoordinate> {
    let mut coordinates = Vec::new();
    if block.iter().any(|range| range.is_empty()) {
        return coordinates;
    }

    let mut current: SampleCoordinate = block.iter().map(|range| range.start).collect();

    loop {
        coordinates.push(current.clone());

        let mut dimension = 0;
        loop {
            if dimension == block.len() {
                return coordinates;
            }

            current[dimension] += 1;
            if current[dimension] < block[dimension].end {
                break;
            }

            current[dimension] = block[dimension].start;
            dimension += 1;
        }
    }
}

fn aggregate(method: ResampleMethod, kind: FieldType, values: &[Value]) -> Result<Value> {
    debug_assert!(!values.is_empty(), "resample neighborhood is never empty");

    match method {
        ResampleMethod::Max => {
            let mut best = values[0];
            for value in &values[1 ..] {
                if value.compare(&best)? == std::cmp::Ordering::Greater { best = *value; }
            }

            Ok(best)
        },

        ResampleMethod::Min => {
            let mut best = values[0];
            for value in &values[1 ..] {
                if value.compare(&best)? == std::cmp::Ordering::Less { best = *value; }
            }

            Ok(best)
        },

        ResampleMethod::Mean => {
            let sum: f64 = values.iter().map(Value::to_f64).sum();
            Ok(Value::from_f64(kind, sum / values.len() as f64))
        },

        ResampleMethod::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_unstable_by(|a, b| a.compare(b).expect("field values share one type"));

            let middle = sorted.len() / 2;
            if sorted.len() % 2 == 1 {
                Ok(sorted[middle])
            }
            else {
                let lower = sorted[middle - 1].to_f64();
                let upper = sorted[middle].to_f64();
                Ok(Value::from_f64(kind, (lower + upper) / 2.0))
            }
        },

        ResampleMethod::First | ResampleMethod::Center =>
            unreachable!("positional methods never aggregate"),
    }
}
