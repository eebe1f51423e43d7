//! This module contains the pure, stateless, and performant kernels for performing
//! Zstandard compression and decompression of a single block.
//!
//! This is the entropy-coding stage of the chunk codec. It takes a block that has
//! already been reorganized by the filter pipeline and applies the `zstd` crate.
//! This module is a safe, panic-free wrapper around that crate; the chunk index
//! in any returned error is filled in by the chunk store.

use std::io::Write;
use zstd::stream::Encoder;

use crate::error::{Result, TambakError};

/// Maps the store-level `0..=9` level onto the zstd level range.
fn zstd_level(level: u8) -> i32 {
    match level {
        0 => 1,
        l if l >= 9 => 19,
        l => (l as i32) * 2 - 1,
    }
}

/// Compresses a block with the Zstandard algorithm.
pub fn encode(input_bytes: &[u8], level: u8) -> Result<Vec<u8>> {
    let mut output_buf = Vec::with_capacity(input_bytes.len() / 2 + 16);

    // We use the streaming Encoder, which writes directly to the output buffer.
    let mut encoder = Encoder::new(&mut output_buf, zstd_level(level))
        .map_err(|e| TambakError::codec(0, format!("zstd: {}", e)))?;
    encoder
        .write_all(input_bytes)
        .map_err(|e| TambakError::codec(0, format!("zstd: {}", e)))?;

    // `finish` is essential to finalize the Zstd frame.
    encoder
        .finish()
        .map_err(|e| TambakError::codec(0, format!("zstd: {}", e)))?;
    Ok(output_buf)
}

/// Decompresses a Zstandard block, checking it against the expected size.
pub fn decode(input_bytes: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut decompressed_data = Vec::with_capacity(expected_len);
    zstd::stream::copy_decode(input_bytes, &mut decompressed_data)
        .map_err(|e| TambakError::codec(0, format!("zstd: {}", e)))?;

    if decompressed_data.len() != expected_len {
        return Err(TambakError::codec(
            0,
            format!(
                "zstd: decompressed size does not match header. Expected {}, got {}.",
                expected_len,
                decompressed_data.len()
            ),
        ));
    }

    Ok(decompressed_data)
}
