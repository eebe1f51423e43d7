// In: src/codec.rs

//! The narrow codec interface the chunk store consumes.
//!
//! A [`Codec`] only knows how to turn one block of bytes into a compressed block
//! and back. Filters (`Shuffle`, `Delta`) are applied around it by
//! [`encode_block`] / [`decode_block`]. The store never performs entropy
//! coding itself; swapping the codec means implementing this trait.

use crate::config::{CodecConfig, CodecId, Filter};
use crate::error::Result;
use crate::kernels;

//==================================================================================
// 1. The Codec Trait
//==================================================================================

pub trait Codec: Send + Sync {
    fn id(&self) -> CodecId;

    /// Compresses one (already filtered) block.
    fn compress(&self, block: &[u8], level: u8) -> Result<Vec<u8>>;

    /// Decompresses one block. Must fail if the result is not `expected_len` bytes.
    fn decompress(&self, block: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

/// Zstandard, backed by the `zstd` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZstdCodec;

impl Codec for ZstdCodec {
    fn id(&self) -> CodecId {
        CodecId::Zstd
    }

    fn compress(&self, block: &[u8], level: u8) -> Result<Vec<u8>> {
        kernels::zstd::encode(block, level)
    }

    fn decompress(&self, block: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        kernels::zstd::decode(block, expected_len)
    }
}

/// Pass-through codec. Useful for already-compressed payloads and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCodec;

impl Codec for NoopCodec {
    fn id(&self) -> CodecId {
        CodecId::Noop
    }

    fn compress(&self, block: &[u8], _level: u8) -> Result<Vec<u8>> {
        Ok(block.to_vec())
    }

    fn decompress(&self, block: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if block.len() != expected_len {
            return Err(crate::error::TambakError::codec(
                0,
                format!(
                    "noop: stored block is {} bytes, expected {}",
                    block.len(),
                    expected_len
                ),
            ));
        }
        Ok(block.to_vec())
    }
}

/// Resolves a codec id to its implementation.
pub fn codec_for(id: CodecId) -> &'static dyn Codec {
    static ZSTD: ZstdCodec = ZstdCodec;
    static NOOP: NoopCodec = NoopCodec;
    match id {
        CodecId::Zstd => &ZSTD,
        CodecId::Noop => &NOOP,
    }
}

//==================================================================================
// 2. Filter Pipeline
//==================================================================================

/// Packs a filter list into the bitmask stored in every chunk header.
pub(crate) fn filter_mask(filters: &[Filter]) -> u8 {
    filters.iter().fold(0, |mask, f| mask | f.bit())
}

/// Canonical filter order. Delta runs before shuffle so the XOR works on whole elements.
fn filters_from_mask(mask: u8) -> Vec<Filter> {
    [Filter::Delta, Filter::Shuffle]
        .into_iter()
        .filter(|f| mask & f.bit() != 0)
        .collect()
}

/// Applies the filter pipeline and then the codec to one block.
pub(crate) fn encode_block(
    codec: &dyn Codec,
    block: &[u8],
    config: &CodecConfig,
    mask: u8,
) -> Result<Vec<u8>> {
    let mut data = block.to_vec();
    for filter in filters_from_mask(mask) {
        data = match filter {
            Filter::Delta => kernels::xor_delta::encode(&data, config.typesize),
            Filter::Shuffle => kernels::shuffle::encode(&data, config.typesize),
        };
    }
    codec.compress(&data, config.level)
}

/// Reverses [`encode_block`].
pub(crate) fn decode_block(
    codec: &dyn Codec,
    block: &[u8],
    expected_len: usize,
    typesize: usize,
    mask: u8,
) -> Result<Vec<u8>> {
    let mut data = codec.decompress(block, expected_len)?;
    for filter in filters_from_mask(mask).into_iter().rev() {
        data = match filter {
            Filter::Delta => kernels::xor_delta::decode(&data, typesize),
            Filter::Shuffle => kernels::shuffle::decode(&data, typesize),
        };
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_roundtrip_with_all_filters() {
        let config = CodecConfig {
            filters: vec![Filter::Shuffle, Filter::Delta],
            typesize: 8,
            ..CodecConfig::default()
        };
        let values: Vec<u8> = (0..512u64).flat_map(|v| (v * 3).to_le_bytes()).collect();
        let mask = filter_mask(&config.filters);
        let codec = codec_for(config.codec);

        let encoded = encode_block(codec, &values, &config, mask).unwrap();
        assert!(encoded.len() < values.len() / 4);
        let decoded = decode_block(codec, &encoded, values.len(), 8, mask).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_noop_codec_checks_expected_size() {
        let codec = codec_for(CodecId::Noop);
        assert!(codec.decompress(&[1, 2, 3], 4).is_err());
        assert_eq!(codec.decompress(&[1, 2, 3], 3).unwrap(), vec![1, 2, 3]);
    }
}
