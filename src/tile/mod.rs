
//! Stream samples into and out of layers in tile order.
//!
//! Tile order differs from sample order whenever a dimension is split
//! into more than one tile: all samples of one tile are visited before
//! any sample of the next. Iterating in this order touches every tile
//! payload exactly once, which is what makes whole-layer reads and
//! writes cheap compared to random access.

pub mod read;
pub mod write;

use crate::meta::dimension::TileCoordinate;
use crate::meta::layer::Layer;

/// Locates one stored tile payload while walking a layer in storage order.
/// Planar layers visit every logical tile once per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTile {

    /// Index into the layer's tile tables.
    pub stored_index: usize,

    /// Linear index of the logical tile in the tile grid.
    pub logical_tile: usize,

    /// Grid position of the logical tile.
    pub tile_coordinate: TileCoordinate,

    /// The field whose plane this payload holds.
    /// `None` for interleaved layers, where one payload holds all fields.
    pub field_index: Option<usize>,
}

/// Walk all stored tile payloads of a layer in storage order.
pub fn stored_tiles(layer: &Layer) -> impl Iterator<Item = StoredTile> {
    let separated = layer.separated;
    let planes = if separated { layer.fields.len() } else { 1 };

    layer.dimensions.tile_coordinates().enumerate()
        .flat_map(move |(logical_tile, tile_coordinate)| {
            (0 .. planes).map(move |field| StoredTile {
                stored_index: logical_tile * planes + field,
                logical_tile,
                tile_coordinate: tile_coordinate.clone(),
                field_index: if separated { Some(field) } else { None },
            })
        })
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::compression::Compression;
    use crate::meta::dimension::{Dimension, DimensionSet};
    use crate::meta::field::{Field, FieldSet, FieldType};

    fn layer(separated: bool) -> Layer {
        Layer::new(
            "test",
            DimensionSet::new(vec![
                Dimension::new("x", 4, 2).unwrap(),
                Dimension::new("y", 2, 2).unwrap(),
            ]),
            FieldSet::new(vec![
                Field::new("a", FieldType::U8),
                Field::new("b", FieldType::F32),
            ]),
            separated,
            Compression::None,
        ).unwrap()
    }

    #[test]
    fn interleaved_layers_store_one_payload_per_tile() {
        let layer = layer(false);
        let tiles: Vec<_> = stored_tiles(&layer).collect();

        assert_eq!(tiles.len(), layer.stored_tile_count());
        assert!(tiles.iter().all(|tile| tile.field_index.is_none()));
        assert!(tiles.iter().enumerate().all(|(index, tile)| tile.stored_index == index));
        assert_eq!(tiles[0].tile_coordinate.as_slice(), &[0, 0]);
        assert_eq!(tiles[1].tile_coordinate.as_slice(), &[1, 0]);
    }

    #[test]
    fn planar_layers_store_one_payload_per_field_per_tile() {
        let layer = layer(true);
        let tiles: Vec<_> = stored_tiles(&layer).collect();

        assert_eq!(tiles.len(), layer.stored_tile_count());
        assert_eq!(tiles[0].field_index, Some(0));
        assert_eq!(tiles[1].field_index, Some(1));
        assert_eq!(tiles[0].logical_tile, tiles[1].logical_tile, "fields cycle fastest");
        assert_eq!(tiles[2].logical_tile, 1);

        for tile in &tiles {
            assert_eq!(tile.stored_index, layer.stored_tile_of(tile.logical_tile, tile.field_index.unwrap()));
        }
    }
}
