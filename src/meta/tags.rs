
//! Tag sections: linked `{key → value}` metadata blocks.
//!
//! A file carries any number of tag sections, chained through
//! `next_tags_start` positions. The chain begins at the header's
//! `first_tags_offset` and ends at a zero position. Appending does not
//! move existing bytes: the new section goes to the end of the file and
//! the former tail's next pointer is rewritten to point at it.

use std::collections::{BTreeMap, HashSet};

use crate::encoding::Encoding;
use crate::error::{usize_to_u64, Error, Result, UnitResult};
use crate::io::{Read, Seek, Tracking, Write};

/// The keys and values of one section. Ordered,
/// so that writing a section is deterministic.
pub type TagMap = BTreeMap<String, String>;

/// One `{key → value}` metadata block of a file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagSection {

    /// The tags of this section only.
    /// Use [`merged_tags`] for the combined view of a whole chain.
    pub tags: TagMap,

    /// Absolute file position of the next section, or zero at the tail.
    pub next_tags_start: u64,
}

impl TagSection {

    /// A tail section holding the specified tags.
    pub fn new(tags: TagMap) -> Self {
        TagSection { tags, next_tags_start: 0 }
    }

    /// Read one section at the current stream position.
    pub fn read(encoding: Encoding, read: &mut impl Read) -> Result<Self> {
        let count = encoding.read_offset(read)?;

        let mut tags = TagMap::new();
        for _ in 0 .. count {
            let key = encoding.read_string(read)?;
            let value = encoding.read_string(read)?;
            tags.insert(key, value);
        }

        let next_tags_start = encoding.read_offset(read)?;
        Ok(TagSection { tags, next_tags_start })
    }

    /// Write this section at the current stream position.
    pub fn write(&self, encoding: Encoding, write: &mut impl Write) -> UnitResult {
        encoding.write_offset(write, usize_to_u64(self.tags.len()))?;

        for (key, value) in &self.tags {
            encoding.write_string(write, key)?;
            encoding.write_string(write, value)?;
        }

        encoding.write_offset(write, self.next_tags_start)?;
        Ok(())
    }

    /// The number of bytes `write` will emit for this section.
    pub fn byte_count(&self, encoding: Encoding) -> usize {
        let offset_bytes = encoding.offset_size.byte_count();

        offset_bytes // tag count
            + self.tags.iter()
                .map(|(key, value)| encoding.string_byte_count(key) + encoding.string_byte_count(value))
                .sum::<usize>()
            + offset_bytes // next section position
    }

    /// Absolute position of this section's next pointer,
    /// given the absolute position of the section itself.
    pub fn next_slot_position(&self, encoding: Encoding, section_start: u64) -> u64 {
        section_start + usize_to_u64(self.byte_count(encoding)) - usize_to_u64(encoding.offset_size.byte_count())
    }
}

/// Follow a section chain, returning the sections in chain order
/// together with the absolute position each was read from.
/// A `first_section` of zero yields an empty chain.
/// Revisiting a position is a malformed chain and a format error.
pub fn read_chain(
    encoding: Encoding,
    stream: &mut Tracking<impl Read + Seek>,
    first_section: u64,
) -> Result<Vec<(u64, TagSection)>>
{
    let mut sections = Vec::new();
    let mut visited = HashSet::new();
    let mut position = first_section;

    while position != 0 {
        if !visited.insert(position) {
            return Err(Error::format("cycle in tag section chain"));
        }

        stream.seek_to(position)?;
        let section = TagSection::read(encoding, stream)?;
        let next = section.next_tags_start;

        sections.push((position, section));
        position = next;
    }

    Ok(sections)
}

/// Merge a chain into one map. Later sections win on key collisions.
pub fn merged_tags<'s>(sections: impl IntoIterator<Item = &'s TagSection>) -> BTreeMap<&'s str, &'s str> {
    let mut merged = BTreeMap::new();

    for section in sections {
        for (key, value) in &section.tags {
            merged.insert(key.as_str(), value.as_str());
        }
    }

    merged
}

/// Append a new tail section to an existing chain without moving any
/// existing bytes. Returns the absolute position of the new section.
///
/// If the chain is non-empty, the former tail's next pointer is
/// rewritten in place. If it is empty, the caller must store the
/// returned position into the header's `first_tags_offset` slot.
pub fn append_section(
    encoding: Encoding,
    stream: &mut Tracking<impl Read + Write + Seek>,
    first_section: u64,
    tags: TagMap,
) -> Result<u64>
{
    let chain = read_chain(encoding, stream, first_section)?;

    let new_section_start = stream.seek_to_end()?;
    TagSection::new(tags).write(encoding, stream)?;

    if let Some((tail_start, tail)) = chain.last() {
        // rewrite only the next pointer of the former tail
        stream.seek_to(tail.next_slot_position(encoding, *tail_start))?;
        encoding.write_offset(stream, new_section_start)?;
    }

    Ok(new_section_start)
}
