
//! Raw rfc 1951 deflate tile payloads.
//! Compression goes through miniz_oxide,
//! decompression through the faster zune-inflate.

use zune_inflate::DeflateDecoder;

use super::{ByteVec, Bytes};
use crate::error::{Error, Result};

/// Trades compression ratio against speed. Tiles are re-read
/// far more often than they are written, so lean towards ratio.
const COMPRESSION_LEVEL: u8 = 6;

/// Gzip streams always start with these two magic bytes,
/// which no raw deflate stream of ours ever produces.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn compress_bytes(uncompressed: Bytes<'_>) -> Result<ByteVec> {
    Ok(miniz_oxide::deflate::compress_to_vec(uncompressed, COMPRESSION_LEVEL))
}

pub fn decompress_bytes(compressed: Bytes<'_>) -> Result<ByteVec> {
    // legacy datasets stored gzip wrappers under the deflate tag
    if compressed.starts_with(&GZIP_MAGIC) {
        DeflateDecoder::new(compressed).decode_gzip()
            .map_err(|error| Error::codec(format!("gzip tile payload: {:?}", error.error)))
    }
    else {
        DeflateDecoder::new(compressed).decode_deflate()
            .map_err(|error| Error::codec(format!("deflate tile payload: {:?}", error.error)))
    }
}
