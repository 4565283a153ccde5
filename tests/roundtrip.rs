
//! Whole-file roundtrips: write, reopen, compare every sample.

extern crate pixi;

use std::io::Cursor;

use pixi::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::smallvec;

fn encoding() -> Encoding {
    Encoding::new(ByteOrder::LittleEndian, OffsetSize::Eight)
}

/// Deterministic pseudo-random samples for a layer, seeded at zero,
/// indexed by sample index.
fn seeded_samples(layer: &Layer, seed: u64) -> Vec<Sample> {
    let mut random = StdRng::seed_from_u64(seed);

    (0 .. layer.dimensions.sample_count())
        .map(|_| layer.fields.iter().map(|field| match field.kind {
            FieldType::F32 => Value::F32(random.random_range(0 .. 1000) as f32),
            FieldType::U16 => Value::U16(random.random()),
            FieldType::U8 => Value::U8(random.random()),
            _ => unimplemented!("seed data for this type"),
        }).collect())
        .collect()
}

fn layer_a() -> Layer {
    Layer::new(
        "layer-a",
        DimensionSet::new(vec![
            Dimension::new("x", 10, 5).unwrap(),
            Dimension::new("y", 20, 5).unwrap(),
        ]),
        FieldSet::new(vec![
            Field::new("lum", FieldType::F32),
            Field::new("depth", FieldType::U16),
        ]),
        false,
        Compression::None,
    ).unwrap()
}

fn layer_b() -> Layer {
    Layer::new(
        "layer-b",
        DimensionSet::new(vec![
            Dimension::new("x", 15, 5).unwrap(),
            Dimension::new("y", 30, 5).unwrap(),
            Dimension::new("z", 5, 5).unwrap(),
        ]),
        FieldSet::new(vec![
            Field::new("r", FieldType::U8),
            Field::new("g", FieldType::U8),
            Field::new("b", FieldType::U8),
        ]),
        false,
        Compression::Deflate,
    ).unwrap()
}

/// Write the two-layer example file and return its bytes
/// together with the expected samples of both layers.
fn write_two_layer_file() -> (Vec<u8>, Vec<Vec<Sample>>) {
    let expected = vec![
        seeded_samples(&layer_a(), 0),
        seeded_samples(&layer_b(), 0),
    ];

    let bytes = write_pixi_with(Cursor::new(Vec::new()), encoding(), |writer| {
        let mut tags = TagMap::new();
        tags.insert("keyOne".into(), "valOne".into());
        tags.insert("keyTwo".into(), "valTwoExtra".into());
        writer.write_tags(tags)?;

        for (layer, samples) in [layer_a(), layer_b()].into_iter().zip(&expected) {
            let dimensions = layer.dimensions.clone();
            writer.write_layer(layer, |layer_writer| {
                layer_writer.write_samples(|coordinate|
                    Ok(samples[dimensions.sample_index(coordinate)?].clone()))
            })?;
        }

        Ok(())
    }).unwrap().into_inner();

    (bytes, expected)
}

#[test]
fn two_layer_file_reopens_with_identical_content() {
    let (bytes, expected) = write_two_layer_file();

    let pixi = Pixi::read_from_buffered(&mut Cursor::new(bytes.clone())).unwrap();

    assert_eq!(pixi.all_tags().get("keyOne"), Some(&"valOne"));
    assert_eq!(pixi.all_tags().get("keyTwo"), Some(&"valTwoExtra"));

    assert_eq!(pixi.layers.len(), 2);
    assert_eq!(pixi.layers[0].name, "layer-a");
    assert_eq!(pixi.layers[1].name, "layer-b");

    for layer in &pixi.layers {
        assert!(layer.tile_offsets.iter().all(|&offset| offset > 0));
        assert!(layer.tile_bytes.iter().all(|&count| count > 0));
    }

    // every sample reads back exactly as written, via the tile-order reader
    for (layer, expected_samples) in pixi.layers.iter().zip(&expected) {
        let mut stream = Cursor::new(bytes.clone());
        let reader = TileSamplesReader::new(&mut stream, pixi.header.encoding.byte_order, layer);

        let mut seen = 0;
        for entry in reader {
            let (coordinate, sample) = entry.unwrap();
            let sample_index = layer.dimensions.sample_index(&coordinate).unwrap();
            assert_eq!(sample, expected_samples[sample_index]);
            seen += 1;
        }

        assert_eq!(seen, layer.dimensions.sample_count());
    }
}

#[test]
fn random_access_matches_the_written_samples() {
    let (bytes, expected) = write_two_layer_file();
    let pixi = Pixi::read_from_buffered(&mut Cursor::new(bytes.clone())).unwrap();

    for (layer, expected_samples) in pixi.layers.iter().zip(&expected) {
        let cache = LayerReadCache::with_lfu(
            Cursor::new(bytes.clone()),
            pixi.header.encoding.byte_order,
            layer.clone(),
            4,
        );

        // probe in sample order, which crosses tiles constantly
        for coordinate in layer.dimensions.sample_coordinates() {
            let sample_index = layer.dimensions.sample_index(&coordinate).unwrap();
            assert_eq!(cache.sample_at(&coordinate).unwrap(), expected_samples[sample_index]);
            assert!(cache.cached_tile_count() <= 4);
        }
    }
}

#[test]
fn rewriting_a_file_preserves_it_modulo_tile_offsets() {
    let (bytes, _) = write_two_layer_file();
    let first = Pixi::read_from_buffered(&mut Cursor::new(bytes.clone())).unwrap();

    // re-encode with the same compression: a fresh but equivalent file
    let copied = pixi::pipeline::copy_with_compression(
        &mut Cursor::new(bytes),
        Cursor::new(Vec::new()),
        Compression::Deflate,
    ).unwrap().into_inner();

    let second = Pixi::read_from_buffered(&mut Cursor::new(copied.clone())).unwrap();

    assert_eq!(first.all_tags(), second.all_tags());
    assert_eq!(first.layers.len(), second.layers.len());

    for (original, copy) in first.layers.iter().zip(&second.layers) {
        assert_eq!(original.name, copy.name);
        assert_eq!(original.dimensions, copy.dimensions);
        assert_eq!(original.fields, copy.fields);
        assert_eq!(original.separated, copy.separated);
    }
}

#[test]
fn big_endian_and_narrow_offsets_roundtrip() {
    let encodings = [
        Encoding::new(ByteOrder::BigEndian, OffsetSize::Eight),
        Encoding::new(ByteOrder::BigEndian, OffsetSize::Four),
        Encoding::new(ByteOrder::LittleEndian, OffsetSize::Four),
    ];

    for encoding in encodings {
        let layer = layer_a();
        let samples = seeded_samples(&layer, 7);
        let dimensions = layer.dimensions.clone();

        let bytes = write_pixi_with(Cursor::new(Vec::new()), encoding, |writer| {
            writer.write_layer(layer, |layer_writer| {
                layer_writer.write_samples(|coordinate|
                    Ok(samples[dimensions.sample_index(coordinate)?].clone()))
            })?;
            Ok(())
        }).unwrap().into_inner();

        let pixi = Pixi::read_from_buffered(&mut Cursor::new(bytes.clone())).unwrap();
        assert_eq!(pixi.header.encoding, encoding);

        let mut stream = Cursor::new(bytes);
        let reader = TileSamplesReader::new(&mut stream, encoding.byte_order, &pixi.layers[0]);

        for entry in reader {
            let (coordinate, sample) = entry.unwrap();
            let sample_index = pixi.layers[0].dimensions.sample_index(&coordinate).unwrap();
            assert_eq!(sample, samples[sample_index]);
        }
    }
}

#[test]
fn planar_layers_roundtrip() {
    let layer = Layer::new(
        "planar",
        DimensionSet::new(vec![
            Dimension::new("x", 7, 3).unwrap(),
            Dimension::new("y", 4, 3).unwrap(),
        ]),
        FieldSet::new(vec![
            Field::new("height", FieldType::F32),
            Field::new("mask", FieldType::U8),
        ]),
        true,
        Compression::Rle8,
    ).unwrap();

    let dimensions = layer.dimensions.clone();
    let sample_of = |coordinate: &SampleCoordinate| -> Sample {
        smallvec![
            Value::F32((coordinate[0] * 31 + coordinate[1]) as f32),
            Value::U8((coordinate[0] + coordinate[1] * 2) as u8),
        ]
    };

    let bytes = write_pixi_with(Cursor::new(Vec::new()), encoding(), |writer| {
        writer.write_layer(layer, |layer_writer| {
            layer_writer.write_samples(|coordinate| Ok(sample_of(coordinate)))
        })?;
        Ok(())
    }).unwrap().into_inner();

    let pixi = Pixi::read_from_buffered(&mut Cursor::new(bytes.clone())).unwrap();
    let layer = &pixi.layers[0];
    assert!(layer.separated);
    assert_eq!(layer.stored_tile_count(), dimensions.tile_count() * 2);

    // tile-order read
    let mut stream = Cursor::new(bytes.clone());
    for entry in TileSamplesReader::new(&mut stream, ByteOrder::LittleEndian, layer) {
        let (coordinate, sample) = entry.unwrap();
        assert_eq!(sample, sample_of(&coordinate));
    }

    // random access
    let cache = LayerReadCache::with_fifo(Cursor::new(bytes), ByteOrder::LittleEndian, layer.clone(), 6);
    for coordinate in dimensions.sample_coordinates() {
        assert_eq!(cache.sample_at(&coordinate).unwrap(), sample_of(&coordinate));
    }
}

#[test]
fn tags_append_to_an_existing_file_on_disk() {
    let (bytes, _) = write_two_layer_file();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &bytes).unwrap();

    let before = Pixi::read_from_file(file.path()).unwrap();
    assert_eq!(before.tags.len(), 1);

    let mut appended = TagMap::new();
    appended.insert("appended".into(), "later".into());
    appended.insert("keyTwo".into(), "overridden".into());

    {
        let mut handle = std::fs::OpenOptions::new()
            .read(true).write(true)
            .open(file.path()).unwrap();

        append_tags(&mut handle, appended).unwrap();
    }

    let after = Pixi::read_from_file(file.path()).unwrap();
    assert_eq!(after.tags.len(), 2);
    assert_eq!(after.header.first_tags_offset, before.header.first_tags_offset, "the chain head must not move");
    assert_eq!(
        after.tags[0].next_tags_start, bytes.len() as u64,
        "the former tail points at the section appended at the end of the file"
    );

    // the merged view has the union, with the appended section winning
    assert_eq!(after.all_tags().get("keyOne"), Some(&"valOne"));
    assert_eq!(after.all_tags().get("keyTwo"), Some(&"overridden"));
    assert_eq!(after.all_tags().get("appended"), Some(&"later"));

    // the layers are untouched
    assert_eq!(after.layers, before.layers);
}
