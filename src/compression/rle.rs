
//! Byte-oriented run length encoding of tile payloads.
//!
//! The compressed stream is a sequence of groups, each introduced by a
//! signed header byte. A non-negative header `n` means the following
//! byte repeats `n + 1` times; a negative header `-n` means the
//! following `n` bytes are verbatim literals. Runs shorter than three
//! bytes are cheaper as literals, so they are never repeat-encoded.

use super::{ByteVec, Bytes};
use crate::error::{Error, Result};

/// Runs of fewer bytes than this take more space as a repeat group
/// than as part of a literal group.
const SHORTEST_ENCODED_RUN: usize = 3;

/// The longest run one repeat group can express
/// (header bytes 0 ..= 127 encode 1 ..= 128 repetitions).
const LONGEST_RUN: usize = 128;

/// The longest literal group
/// (header bytes -128 ..= -1 encode 1 ..= 128 literals).
const LONGEST_LITERAL: usize = 128;


pub fn compress_bytes(uncompressed: Bytes<'_>) -> Result<ByteVec> {
    let mut compressed = Vec::with_capacity(uncompressed.len() / 2 + 2);

    let mut position = 0;
    let mut literal_start = 0; // bytes since here are not emitted yet

    while position < uncompressed.len() {
        // measure the run of equal bytes under the cursor
        let run_length = uncompressed[position ..].iter()
            .take(LONGEST_RUN)
            .take_while(|&&byte| byte == uncompressed[position])
            .count();

        if run_length < SHORTEST_ENCODED_RUN {
            // too short to pay off, leave it for the next literal group
            position += run_length;
        }
        else {
            push_literal_groups(&mut compressed, &uncompressed[literal_start .. position]);

            compressed.push((run_length - 1) as u8);
            compressed.push(uncompressed[position]);

            position += run_length;
            literal_start = position;
        }
    }

    push_literal_groups(&mut compressed, &uncompressed[literal_start ..]);
    Ok(compressed)
}

/// Emit pending literal bytes, splitting them
/// into groups the header byte can count.
fn push_literal_groups(compressed: &mut ByteVec, mut literals: &[u8]) {
    while !literals.is_empty() {
        let group_length = literals.len().min(LONGEST_LITERAL);

        compressed.push((-(group_length as i32)) as u8);
        compressed.extend_from_slice(&literals[.. group_length]);

        literals = &literals[group_length ..];
    }
}

pub fn decompress_bytes(compressed: Bytes<'_>, expected_byte_size: usize) -> Result<ByteVec> {
    let mut decompressed = Vec::with_capacity(expected_byte_size);
    let mut position = 0;

    while position < compressed.len() {
        let header = compressed[position] as i8;
        position += 1;

        if header < 0 {
            // a literal group of '-header' verbatim bytes
            let group_length = header.unsigned_abs() as usize;

            let literals = compressed.get(position .. position + group_length)
                .ok_or_else(|| Error::codec("rle literal group exceeds the compressed data"))?;

            decompressed.extend_from_slice(literals);
            position += group_length;
        }
        else {
            // a repeat group: the next byte, 'header + 1' times
            let value = *compressed.get(position)
                .ok_or_else(|| Error::codec("rle repeat group is missing its value"))?;
            position += 1;

            decompressed.resize(decompressed.len() + header as usize + 1, value);
        }

        // every group produces at least one byte, so trailing
        // compressed data always trips this as well
        if decompressed.len() > expected_byte_size {
            return Err(Error::codec("rle data exceeds the tile size"));
        }
    }

    if decompressed.len() != expected_byte_size {
        return Err(Error::codec("rle data ends before the tile is complete"));
    }

    Ok(decompressed)
}


#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let compressed = compress_bytes(data).unwrap();
        let decompressed = decompress_bytes(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn roundtrip_flat_and_noisy() {
        roundtrip(&[]);
        roundtrip(&[0]);
        roundtrip(&[0, 0]);
        roundtrip(&[0, 0, 0, 0, 0, 0, 0]);
        roundtrip(&[1, 2, 3, 4, 5, 6, 7]);
        roundtrip(&[1, 1, 2, 2, 3, 3, 3, 3, 0, 9]);
        roundtrip(&[7, 7, 7, 1, 2, 7, 7, 7, 7]);

        let long_run: Vec<u8> = std::iter::repeat(42).take(1000).collect();
        roundtrip(&long_run);

        let alternating: Vec<u8> = (0 .. 1000).map(|index| (index % 2) as u8).collect();
        roundtrip(&alternating);

        let long_literals: Vec<u8> = (0 .. 1000_u32).map(|index| (index % 251) as u8).collect();
        roundtrip(&long_literals);
    }

    #[test]
    fn flat_runs_actually_shrink() {
        let flat = vec![8_u8; 512];
        let compressed = compress_bytes(&flat).unwrap();

        // four full repeat groups of two bytes each
        assert_eq!(compressed.len(), 2 * (flat.len() / LONGEST_RUN));
    }

    #[test]
    fn short_runs_become_literals() {
        // no run reaches three bytes, so the output is one literal group
        let data = [5_u8, 5, 9, 9, 1];
        let compressed = compress_bytes(&data).unwrap();

        assert_eq!(compressed.len(), 1 + data.len());
        assert_eq!(compressed[0] as i8, -(data.len() as i8));
    }

    #[test]
    fn oversized_literal_stretches_are_split() {
        // 300 non-repeating bytes need three literal groups
        let data: Vec<u8> = (0 .. 300_u32).map(|index| (index % 199) as u8).collect();
        let compressed = compress_bytes(&data).unwrap();

        assert_eq!(compressed.len(), data.len() + 3);
        assert_eq!(compressed[0] as i8, -128);
        roundtrip(&data);
    }

    #[test]
    fn exhausted_stream_is_a_codec_error() {
        // a repeat group missing its value byte
        assert!(matches!(decompress_bytes(&[5], 6), Err(Error::Codec(_))));

        // a literal group missing part of its content
        assert!(matches!(decompress_bytes(&[-3_i8 as u8, 1], 3), Err(Error::Codec(_))));

        // data beyond the expected tile size
        let compressed = compress_bytes(&[1, 2, 3, 4]).unwrap();
        assert!(matches!(decompress_bytes(&compressed, 2), Err(Error::Codec(_))));

        // data ending before the expected tile size
        let compressed = compress_bytes(&[1, 2, 3, 4]).unwrap();
        assert!(matches!(decompress_bytes(&compressed, 9), Err(Error::Codec(_))));
    }
}
