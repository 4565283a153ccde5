
//! Describes all meta data possible in a pixi file:
//! the file header, the tag section chain, and the layer chain.

pub mod dimension;
pub mod field;
pub mod layer;
pub mod tags;

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::encoding::{ByteOrder, Encoding, OffsetSize};
use crate::error::{Error, Result, UnitResult};
use crate::io::{Read, Seek, Tracking, Write};
use crate::meta::layer::Layer;
use crate::meta::tags::{TagMap, TagSection};

/// The file format version this library reads and writes.
pub const CURRENT_VERSION: u8 = 1;

/// The first four bytes of each pixi file.
/// Used to abort reading non-pixi files.
pub mod magic_number {
    use super::*;

    /// The first four bytes of each pixi file.
    pub const BYTES: [u8; 4] = *b"pixi";

    /// Without validation, write this instance to the byte stream.
    pub fn write(write: &mut impl Write) -> UnitResult {
        write.write_all(&self::BYTES)?;
        Ok(())
    }

    /// Consumes four bytes from the reader and returns whether the file may be a pixi file.
    pub fn is_pixi(read: &mut impl Read) -> Result<bool> {
        let mut magic_num = [0; 4];
        read.read_exact(&mut magic_num)?;
        Ok(magic_num == self::BYTES)
    }

    /// Validate this file. If it is a pixi file, return `Ok(())`.
    pub fn validate_pixi(read: &mut impl Read) -> UnitResult {
        if self::is_pixi(read)? {
            Ok(())
        } else {
            Err(Error::format("file identifier missing"))
        }
    }
}

/// The fixed-size header at the start of every pixi file.
/// Its two chain offsets are written as placeholders at creation
/// and rewritten once the file content has been laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixiHeader {

    /// Format version of the file. Currently always [`CURRENT_VERSION`].
    pub version: u8,

    /// Byte order and offset width of everything that follows.
    pub encoding: Encoding,

    /// Absolute position of the first tag section, or zero if the file has none.
    pub first_tags_offset: u64,

    /// Absolute position of the first layer, or zero if the file has none.
    pub first_layer_offset: u64,
}

impl PixiHeader {

    /// A header for a new file, with empty chains.
    pub fn new(encoding: Encoding) -> Self {
        PixiHeader {
            version: CURRENT_VERSION,
            encoding,
            first_tags_offset: 0,
            first_layer_offset: 0,
        }
    }

    /// Read and validate the header at the start of the stream.
    pub fn read(read: &mut impl Read) -> Result<Self> {
        magic_number::validate_pixi(read)?;

        let mut version_and_layout = [0_u8; 3];
        read.read_exact(&mut version_and_layout)?;

        let version = version_and_layout[0];
        if version != CURRENT_VERSION {
            return Err(Error::format("unknown format version"));
        }

        let encoding = Encoding::new(
            ByteOrder::from_byte(version_and_layout[2])?,
            OffsetSize::from_byte(version_and_layout[1])?,
        );

        let first_tags_offset = encoding.read_offset(read)?;
        let first_layer_offset = encoding.read_offset(read)?;

        Ok(PixiHeader { version, encoding, first_tags_offset, first_layer_offset })
    }

    /// Write the complete header at the start of the stream.
    pub fn write(&self, write: &mut impl Write) -> UnitResult {
        magic_number::write(write)?;
        write.write_all(&[
            self.version,
            self.encoding.offset_size.to_byte(),
            self.encoding.byte_order.to_byte(),
        ])?;

        self.encoding.write_offset(write, self.first_tags_offset)?;
        self.encoding.write_offset(write, self.first_layer_offset)?;
        Ok(())
    }

    /// On-disk size of the header. Fixed once the offset width is known.
    pub fn byte_count(&self) -> usize {
        magic_number::BYTES.len() + 3 + 2 * self.encoding.offset_size.byte_count()
    }

    /// Absolute position of the `first_tags_offset` slot.
    pub fn first_tags_slot_position(&self) -> u64 {
        (magic_number::BYTES.len() + 3) as u64
    }

    /// Absolute position of the `first_layer_offset` slot.
    pub fn first_layer_slot_position(&self) -> u64 {
        self.first_tags_slot_position() + self.encoding.offset_size.byte_count() as u64
    }
}

/// The decoded summary of one pixi file:
/// header, all tag sections, and all layer headers.
/// Tile payloads are not loaded; they are read on demand
/// through [`Layer::read_tile`] or a [`crate::cache::LayerReadCache`].
#[derive(Debug, Clone, PartialEq)]
pub struct Pixi {

    /// The file header.
    pub header: PixiHeader,

    /// All tag sections, in chain order.
    pub tags: Vec<TagSection>,

    /// All layers, in chain order.
    pub layers: Vec<Layer>,
}

impl Pixi {

    /// Decode the summary from any seekable byte source.
    /// The source should be buffered.
    pub fn read_from_buffered<S: Read + Seek>(stream: &mut S) -> Result<Self> {
        let mut stream = Tracking::new(&mut *stream)?;
        stream.seek_to(0)?;

        let header = PixiHeader::read(&mut stream)?;

        let tags = tags::read_chain(header.encoding, &mut stream, header.first_tags_offset)?
            .into_iter().map(|(_, section)| section).collect();

        let layers = read_layer_chain(header.encoding, &mut stream, header.first_layer_offset)?;

        Ok(Pixi { header, tags, layers })
    }

    /// Decode the summary of a local file.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_from_buffered(&mut BufReader::new(File::open(path)?))
    }

    /// Decode the summary of a local file or an `http(s)://` resource.
    pub fn read_from_address(address: &str) -> Result<Self> {
        Self::read_from_buffered(&mut crate::io::open_address(address)?)
    }

    /// The combined tags of all sections. Later sections win on collisions.
    pub fn all_tags(&self) -> BTreeMap<&str, &str> {
        tags::merged_tags(&self.tags)
    }

    /// The first layer with the specified name.
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.name == name)
    }
}

/// Follow the layer chain, filling each layer's tile tables.
fn read_layer_chain(
    encoding: Encoding,
    stream: &mut Tracking<impl Read + Seek>,
    first_layer: u64,
) -> Result<Vec<Layer>>
{
    let mut layers = Vec::new();
    let mut visited = HashSet::new();
    let mut position = first_layer;

    while position != 0 {
        if !visited.insert(position) {
            return Err(Error::format("cycle in layer chain"));
        }

        stream.seek_to(position)?;
        let layer = Layer::read(encoding, stream)?;

        position = layer.next_layer_start;
        layers.push(layer);
    }

    Ok(layers)
}

/// Append a tag section to an existing file in place.
/// This is the only supported mutation of a finished file.
/// The chain pointers are patched without moving any existing bytes,
/// so `first_tags_offset` changes at most from zero to the new section.
pub fn append_tags<S: Read + Write + Seek>(stream: &mut S, tags: TagMap) -> UnitResult {
    let mut stream = Tracking::new(&mut *stream)?;
    stream.seek_to(0)?;

    let header = PixiHeader::read(&mut stream)?;
    let new_section_start = tags::append_section(header.encoding, &mut stream, header.first_tags_offset, tags)?;

    if header.first_tags_offset == 0 {
        // the file had no tags yet, hook the chain into the header
        stream.seek_to(header.first_tags_slot_position())?;
        header.encoding.write_offset(&mut stream, new_section_start)?;
    }

    stream.flush()?;
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn encoding() -> Encoding {
        Encoding::new(ByteOrder::LittleEndian, OffsetSize::Eight)
    }

    #[test]
    fn headers_roundtrip_in_all_encodings() {
        let encodings = [
            Encoding::new(ByteOrder::LittleEndian, OffsetSize::Four),
            Encoding::new(ByteOrder::BigEndian, OffsetSize::Eight),
        ];

        for encoding in encodings {
            let header = PixiHeader {
                version: CURRENT_VERSION,
                encoding,
                first_tags_offset: 40,
                first_layer_offset: 600,
            };

            let mut bytes = Vec::new();
            header.write(&mut bytes).unwrap();
            assert_eq!(bytes.len(), header.byte_count());

            let decoded = PixiHeader::read(&mut Cursor::new(bytes)).unwrap();
            assert_eq!(decoded, header);
        }
    }

    #[test]
    fn missing_magic_is_a_format_error() {
        let bytes = b"abcd\x01\x08\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        let result = PixiHeader::read(&mut Cursor::new(bytes.to_vec()));
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn unknown_version_is_a_format_error() {
        let mut bytes = Vec::new();
        PixiHeader::new(encoding()).write(&mut bytes).unwrap();
        bytes[4] = 200; // version byte

        let result = PixiHeader::read(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn invalid_offset_width_is_a_format_error() {
        let mut bytes = Vec::new();
        PixiHeader::new(encoding()).write(&mut bytes).unwrap();
        bytes[5] = 7; // offset width byte

        let result = PixiHeader::read(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn truncated_header_is_a_format_error() {
        let mut bytes = Vec::new();
        PixiHeader::new(encoding()).write(&mut bytes).unwrap();
        bytes.truncate(10);

        let result = PixiHeader::read(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn slot_positions_follow_the_fixed_prefix() {
        let header = PixiHeader::new(encoding());
        assert_eq!(header.first_tags_slot_position(), 7);
        assert_eq!(header.first_layer_slot_position(), 15);
        assert_eq!(header.byte_count(), 23);
    }

    #[test]
    fn empty_file_summary() {
        let mut bytes = Vec::new();
        PixiHeader::new(encoding()).write(&mut bytes).unwrap();

        let pixi = Pixi::read_from_buffered(&mut Cursor::new(bytes)).unwrap();
        assert!(pixi.tags.is_empty());
        assert!(pixi.layers.is_empty());
        assert!(pixi.all_tags().is_empty());
    }

    #[test]
    fn tags_can_be_appended_to_a_tagless_file() {
        let mut bytes = Vec::new();
        PixiHeader::new(encoding()).write(&mut bytes).unwrap();
        let mut stream = Cursor::new(bytes);

        let mut tags = TagMap::new();
        tags.insert("producer".into(), "unit-test".into());
        append_tags(&mut stream, tags).unwrap();

        let pixi = Pixi::read_from_buffered(&mut stream).unwrap();
        assert_eq!(pixi.tags.len(), 1);
        assert_eq!(pixi.all_tags().get("producer"), Some(&"unit-test"));
        assert!(pixi.header.first_tags_offset > 0);
    }

    #[test]
    fn appending_twice_grows_the_chain_without_moving_the_head() {
        let mut bytes = Vec::new();
        PixiHeader::new(encoding()).write(&mut bytes).unwrap();
        let mut stream = Cursor::new(bytes);

        let mut first = TagMap::new();
        first.insert("keyOne".into(), "valOne".into());
        append_tags(&mut stream, first).unwrap();

        let first_offset = Pixi::read_from_buffered(&mut stream).unwrap().header.first_tags_offset;

        let mut second = TagMap::new();
        second.insert("keyTwo".into(), "valTwoExtra".into());
        append_tags(&mut stream, second).unwrap();

        let pixi = Pixi::read_from_buffered(&mut stream).unwrap();
        assert_eq!(pixi.header.first_tags_offset, first_offset, "the chain head must not move");
        assert_eq!(pixi.tags.len(), 2);
        // the appended section went to the end of the file, directly after the former tail
        assert_eq!(
            pixi.tags[0].next_tags_start,
            pixi.header.first_tags_offset + pixi.tags[0].byte_count(encoding()) as u64,
            "the former tail points at the appended section"
        );
        assert_eq!(pixi.all_tags().get("keyOne"), Some(&"valOne"));
        assert_eq!(pixi.all_tags().get("keyTwo"), Some(&"valTwoExtra"));
    }
}
