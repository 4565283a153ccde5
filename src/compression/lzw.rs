
//! Variable-bit lzw tile payloads in both bit orders.
//!
//! The lsb variant packs code bits least significant first, like the
//! gif family of formats. The msb variant packs most significant first
//! and switches code sizes one code early, like the tiff family.
//! Both operate on 8-bit symbols.

use weezl::{decode, encode, BitOrder};

use super::{ByteVec, Bytes};
use crate::error::{Error, Result};

/// Tile payloads are byte streams, so symbols are always 8 bits wide.
const SYMBOL_BITS: u8 = 8;

pub fn compress_bytes_lsb(uncompressed: Bytes<'_>) -> Result<ByteVec> {
    encode::Encoder::new(BitOrder::Lsb, SYMBOL_BITS)
        .encode(uncompressed)
        .map_err(|error| Error::codec(format!("lzw (lsb) encode: {}", error)))
}

pub fn decompress_bytes_lsb(compressed: Bytes<'_>) -> Result<ByteVec> {
    decode::Decoder::new(BitOrder::Lsb, SYMBOL_BITS)
        .decode(compressed)
        .map_err(|error| Error::codec(format!("lzw (lsb) decode: {}", error)))
}

pub fn compress_bytes_msb(uncompressed: Bytes<'_>) -> Result<ByteVec> {
    encode::Encoder::with_tiff_size_switch(BitOrder::Msb, SYMBOL_BITS)
        .encode(uncompressed)
        .map_err(|error| Error::codec(format!("lzw (msb) encode: {}", error)))
}

pub fn decompress_bytes_msb(compressed: Bytes<'_>) -> Result<ByteVec> {
    decode::Decoder::with_tiff_size_switch(BitOrder::Msb, SYMBOL_BITS)
        .decode(compressed)
        .map_err(|error| Error::codec(format!("lzw (msb) decode: {}", error)))
}
