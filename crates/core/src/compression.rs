//! Symmetric compression for reports leaving the process.
//!
//! zstd frames; both directions fail with `Error::Compression` rather than
//! yielding partial output.

use crate::error::{Error, Result};

/// zstd level used for transport payloads.
const COMPRESSION_LEVEL: i32 = 3;

/// Compresses UTF-8 text into a zstd frame.
pub fn compress(text: &str) -> Result<Vec<u8>> {
    zstd::stream::encode_all(text.as_bytes(), COMPRESSION_LEVEL)
        .map_err(|e| Error::compression(format!("compress failed: {}", e)))
}

/// Decompresses a zstd payload back into text.
pub fn decompress(bytes: &[u8]) -> Result<String> {
    let raw = zstd::stream::decode_all(bytes)
        .map_err(|e| Error::compression(format!("decompress failed: {}", e)))?;

    String::from_utf8(raw)
        .map_err(|e| Error::compression(format!("decompressed payload is not UTF-8: {}", e)))
}

/// Compresses raw bytes (used for CSV bodies sent over HTTP).
pub fn compress_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::encode_all(bytes, COMPRESSION_LEVEL)
        .map_err(|e| Error::compression(format!("compress failed: {}", e)))
}
