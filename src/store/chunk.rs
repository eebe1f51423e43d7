//! Defines the self-describing byte format for a single compressed chunk.
//! This module is the single source of truth for chunk serialization,
//! deserialization, and efficient header peeking.
//!
//! A chunk is split into independently compressed blocks so a reader can
//! decompress only the blocks that overlap a byte range.

use std::io::{Cursor, Read};

use crate::codec::{self, codec_for};
use crate::config::{CodecConfig, CodecId};
use crate::error::{Result, TambakError};

//==================================================================================
// Format Constants
//==================================================================================
/// flags(1) + typesize(1) + filters(1) + codec(1) + nblocks(4) + block_size(4) + nbytes(8) + crc(4)
pub const CHUNK_HEADER_SIZE: usize = 24;
/// Per block: offset(8) + crc(4).
const BLOCK_ENTRY_SIZE: usize = 12;

/// The payload is the raw uncompressed bytes (compression would have expanded them).
const FLAG_MEMCPYED: u8 = 0b0000_0001;

//==================================================================================
// Public Structs
//==================================================================================

/// The metadata held in a chunk's fixed-size header.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ChunkHeader {
    pub flags: u8,
    pub typesize: usize,
    pub filters: u8,
    pub codec: CodecId,
    pub nblocks: usize,
    pub block_size: usize,
    /// Uncompressed size in bytes.
    pub nbytes: usize,
    pub checksum: u32,
}

impl ChunkHeader {
    pub fn is_memcpyed(&self) -> bool {
        self.flags & FLAG_MEMCPYED != 0
    }

    fn block_len(&self, block: usize) -> usize {
        let start = block * self.block_size;
        self.block_size.min(self.nbytes - start)
    }
}

/// One compressed chunk, held in its serialized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    data: Vec<u8>,
    header: ChunkHeader,
}

//==================================================================================
// Core Implementation
//==================================================================================

impl Chunk {
    /// Compresses `raw` with the given codec configuration.
    pub fn compress(raw: &[u8], config: &CodecConfig) -> Result<Chunk> {
        let typesize = config.typesize.max(1);
        let block_size = effective_block_size(raw.len(), config.block_size, typesize);
        if block_size > u32::MAX as usize {
            return Err(TambakError::InvalidParameter(format!(
                "block size {} does not fit the chunk header; set a smaller block_size",
                block_size
            )));
        }
        let nblocks = if raw.is_empty() {
            0
        } else {
            raw.len().div_ceil(block_size)
        };
        let checksum = crc32fast::hash(raw);
        let mask = codec::filter_mask(&config.filters);

        let mut header = ChunkHeader {
            flags: 0,
            typesize,
            filters: mask,
            codec: config.codec,
            nblocks,
            block_size,
            nbytes: raw.len(),
            checksum,
        };

        if config.level > 0 && nblocks > 0 {
            let codec = codec_for(config.codec);
            let mut blocks = Vec::with_capacity(nblocks);
            for block in raw.chunks(block_size) {
                let encoded = codec::encode_block(codec, block, config, mask)?;
                blocks.push((encoded, crc32fast::hash(block)));
            }
            let payload: usize = blocks.iter().map(|(b, _)| b.len()).sum();
            let table = nblocks * BLOCK_ENTRY_SIZE;
            // Only keep the compressed form if it actually saves space.
            if payload + table < raw.len() {
                let mut data = Vec::with_capacity(CHUNK_HEADER_SIZE + table + payload);
                write_header(&mut data, &header);
                let mut offset = (CHUNK_HEADER_SIZE + table) as u64;
                for (encoded, crc) in &blocks {
                    data.extend_from_slice(&offset.to_le_bytes());
                    data.extend_from_slice(&crc.to_le_bytes());
                    offset += encoded.len() as u64;
                }
                for (encoded, _) in &blocks {
                    data.extend_from_slice(encoded);
                }
                return Ok(Chunk { data, header });
            }
        }

        header.flags |= FLAG_MEMCPYED;
        let mut data = Vec::with_capacity(CHUNK_HEADER_SIZE + raw.len());
        write_header(&mut data, &header);
        data.extend_from_slice(raw);
        Ok(Chunk { data, header })
    }

    /// Deserializes a chunk from its bytes, validating the header and layout.
    pub fn from_bytes(data: Vec<u8>) -> Result<Chunk> {
        let header = Self::peek_header(&data)?;
        let expected_min = if header.is_memcpyed() {
            CHUNK_HEADER_SIZE.checked_add(header.nbytes)
        } else {
            Some(CHUNK_HEADER_SIZE + header.nblocks * BLOCK_ENTRY_SIZE)
        };
        let expected_min = expected_min.unwrap_or(usize::MAX);
        if data.len() < expected_min {
            return Err(TambakError::FrameFormatError(format!(
                "Chunk is truncated: need at least {} bytes, got {}",
                expected_min,
                data.len()
            )));
        }
        Ok(Chunk { data, header })
    }

    /// Parses only the fixed-size header.
    pub fn peek_header(bytes: &[u8]) -> Result<ChunkHeader> {
        if bytes.len() < CHUNK_HEADER_SIZE {
            return Err(TambakError::FrameFormatError(format!(
                "Chunk is too small to be valid. Minimum size: {}, got: {}",
                CHUNK_HEADER_SIZE,
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let map_err = |e: std::io::Error| TambakError::FrameFormatError(e.to_string());

        let mut small = [0u8; 4];
        cursor.read_exact(&mut small).map_err(map_err)?;
        let mut u32_buf = [0u8; 4];
        let mut u64_buf = [0u8; 8];
        cursor.read_exact(&mut u32_buf).map_err(map_err)?;
        let nblocks = u32::from_le_bytes(u32_buf) as usize;
        cursor.read_exact(&mut u32_buf).map_err(map_err)?;
        let block_size = u32::from_le_bytes(u32_buf) as usize;
        cursor.read_exact(&mut u64_buf).map_err(map_err)?;
        let nbytes = u64::from_le_bytes(u64_buf) as usize;
        cursor.read_exact(&mut u32_buf).map_err(map_err)?;
        let checksum = u32::from_le_bytes(u32_buf);

        let flags = small[0];
        if flags & FLAG_MEMCPYED == 0 && nbytes > 0 {
            if block_size == 0 || nbytes.div_ceil(block_size) != nblocks {
                return Err(TambakError::FrameFormatError(format!(
                    "Inconsistent block layout: {} blocks of {} bytes for {} bytes",
                    nblocks, block_size, nbytes
                )));
            }
            let table_end = nblocks
                .checked_mul(BLOCK_ENTRY_SIZE)
                .and_then(|table| table.checked_add(CHUNK_HEADER_SIZE));
            if table_end.map_or(true, |end| end > bytes.len()) {
                return Err(TambakError::FrameFormatError(format!(
                    "Block index of {} entries does not fit in a {} byte chunk",
                    nblocks,
                    bytes.len()
                )));
            }
        } else if nblocks > 0 && (block_size == 0 || nbytes.div_ceil(block_size) != nblocks) {
            return Err(TambakError::FrameFormatError(format!(
                "Inconsistent block layout: {} blocks of {} bytes for {} bytes",
                nblocks, block_size, nbytes
            )));
        }

        Ok(ChunkHeader {
            flags,
            typesize: small[1] as usize,
            filters: small[2],
            codec: CodecId::from_byte(small[3])?,
            nblocks,
            block_size,
            nbytes,
            checksum,
        })
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// Uncompressed size in bytes.
    pub fn nbytes(&self) -> usize {
        self.header.nbytes
    }

    /// Stored (compressed) size in bytes, header included.
    pub fn cbytes(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Decompresses the whole chunk and verifies its checksum.
    pub fn decompress(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.header.nbytes];
        self.decompress_into(&mut out)?;
        Ok(out)
    }

    /// Decompresses into a caller buffer of exactly `nbytes()` bytes.
    pub fn decompress_into(&self, out: &mut [u8]) -> Result<()> {
        if out.len() != self.header.nbytes {
            return Err(TambakError::ShapeMismatch(format!(
                "output buffer is {} bytes but chunk holds {}",
                out.len(),
                self.header.nbytes
            )));
        }
        if self.header.is_memcpyed() {
            out.copy_from_slice(&self.data[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + out.len()]);
        } else {
            for block in 0..self.header.nblocks {
                let start = block * self.header.block_size;
                let decoded = self.decode_block(block)?;
                out[start..start + decoded.len()].copy_from_slice(&decoded);
            }
        }
        let computed = crc32fast::hash(out);
        if computed != self.header.checksum {
            return Err(TambakError::ChecksumMismatch {
                chunk: 0,
                stored: self.header.checksum,
                computed,
            });
        }
        Ok(())
    }

    /// Decompresses only the blocks overlapping `[start, start + len)` and
    /// returns exactly that byte range. Each touched block's checksum is verified.
    pub fn decompress_range(&self, start: usize, len: usize) -> Result<Vec<u8>> {
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.header.nbytes)
            .ok_or_else(|| {
                TambakError::IndexOutOfRange(format!(
                    "byte range {}..{} outside chunk of {} bytes",
                    start,
                    start.saturating_add(len),
                    self.header.nbytes
                ))
            })?;
        if len == 0 {
            return Ok(Vec::new());
        }
        if self.header.is_memcpyed() {
            let base = CHUNK_HEADER_SIZE;
            return Ok(self.data[base + start..base + end].to_vec());
        }

        let bs = self.header.block_size;
        let (first, last) = (start / bs, (end - 1) / bs);
        let mut out = Vec::with_capacity(len);
        for block in first..=last {
            let decoded = self.decode_block(block)?;
            let block_start = block * bs;
            let lo = start.max(block_start) - block_start;
            let hi = end.min(block_start + decoded.len()) - block_start;
            out.extend_from_slice(&decoded[lo..hi]);
        }
        Ok(out)
    }

    fn block_entry(&self, block: usize) -> (usize, u32) {
        let pos = CHUNK_HEADER_SIZE + block * BLOCK_ENTRY_SIZE;
        let mut u64_buf = [0u8; 8];
        u64_buf.copy_from_slice(&self.data[pos..pos + 8]);
        let mut u32_buf = [0u8; 4];
        u32_buf.copy_from_slice(&self.data[pos + 8..pos + 12]);
        (u64::from_le_bytes(u64_buf) as usize, u32::from_le_bytes(u32_buf))
    }

    fn decode_block(&self, block: usize) -> Result<Vec<u8>> {
        let (offset, crc) = self.block_entry(block);
        let end = if block + 1 < self.header.nblocks {
            self.block_entry(block + 1).0
        } else {
            self.data.len()
        };
        if offset > end || end > self.data.len() {
            return Err(TambakError::codec(0, format!("block {} offsets are corrupt", block)));
        }
        let decoded = codec::decode_block(
            codec_for(self.header.codec),
            &self.data[offset..end],
            self.header.block_len(block),
            self.header.typesize,
            self.header.filters,
        )?;
        let computed = crc32fast::hash(&decoded);
        if computed != crc {
            return Err(TambakError::ChecksumMismatch {
                chunk: 0,
                stored: crc,
                computed,
            });
        }
        Ok(decoded)
    }
}

//==================================================================================
// Private Helpers
//==================================================================================

/// Rounds the configured block size to a whole number of elements; `0` means
/// "one block for the whole chunk".
fn effective_block_size(nbytes: usize, configured: usize, typesize: usize) -> usize {
    if configured == 0 || configured >= nbytes {
        return nbytes.max(1);
    }
    let rounded = (configured / typesize) * typesize;
    rounded.max(typesize)
}

fn write_header(buf: &mut Vec<u8>, header: &ChunkHeader) {
    buf.push(header.flags);
    buf.push(header.typesize as u8);
    buf.push(header.filters);
    buf.push(header.codec.to_byte());
    buf.extend_from_slice(&(header.nblocks as u32).to_le_bytes());
    buf.extend_from_slice(&(header.block_size as u32).to_le_bytes());
    buf.extend_from_slice(&(header.nbytes as u64).to_le_bytes());
    buf.extend_from_slice(&header.checksum.to_le_bytes());
}

//==================================================================================
// Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Filter;

    fn ascending_i64(n: i64) -> Vec<u8> {
        (0..n).flat_map(|v| v.to_le_bytes()).collect()
    }

    fn config(block_size: usize) -> CodecConfig {
        CodecConfig {
            typesize: 8,
            block_size,
            ..CodecConfig::default()
        }
    }

    #[test]
    fn test_chunk_roundtrip_is_successful() {
        let raw = ascending_i64(1000);
        let chunk = Chunk::compress(&raw, &config(0)).unwrap();
        assert!(!chunk.header().is_memcpyed());
        assert!(chunk.cbytes() < raw.len());
        assert_eq!(chunk.decompress().unwrap(), raw);

        let reparsed = Chunk::from_bytes(chunk.as_bytes().to_vec()).unwrap();
        assert_eq!(reparsed, chunk);
    }

    #[test]
    fn test_incompressible_data_is_memcpyed() {
        let raw: Vec<u8> = (0..24u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        let chunk = Chunk::compress(
            &raw,
            &CodecConfig {
                filters: vec![],
                ..CodecConfig::default()
            },
        )
        .unwrap();
        assert!(chunk.header().is_memcpyed());
        assert_eq!(chunk.cbytes(), CHUNK_HEADER_SIZE + raw.len());
        assert_eq!(chunk.decompress().unwrap(), raw);
    }

    #[test]
    fn test_level_zero_stores_raw() {
        let raw = vec![0u8; 4096];
        let chunk = Chunk::compress(
            &raw,
            &CodecConfig {
                level: 0,
                ..CodecConfig::default()
            },
        )
        .unwrap();
        assert!(chunk.header().is_memcpyed());
        assert_eq!(chunk.decompress().unwrap(), raw);
    }

    #[test]
    fn test_range_decompression_touches_only_needed_blocks() {
        let raw = ascending_i64(4096);
        let chunk = Chunk::compress(&raw, &config(1024)).unwrap();
        assert_eq!(chunk.header().nblocks, 32);

        let range = chunk.decompress_range(1020, 40).unwrap();
        assert_eq!(range, &raw[1020..1060]);
        assert!(chunk.decompress_range(raw.len() - 1, 2).is_err());
    }

    #[test]
    fn test_corruption_is_reported() {
        let raw = ascending_i64(512);
        let chunk = Chunk::compress(
            &raw,
            &CodecConfig {
                codec: CodecId::Noop,
                filters: vec![Filter::Delta],
                typesize: 8,
                ..CodecConfig::default()
            },
        )
        .unwrap();
        let mut bytes = chunk.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let corrupt = Chunk::from_bytes(bytes).unwrap();
        let err = corrupt.decompress().unwrap_err();
        assert!(matches!(
            err,
            TambakError::ChecksumMismatch { .. } | TambakError::Codec { .. }
        ));
    }

    #[test]
    fn test_parsing_errors_are_handled_gracefully() {
        assert!(matches!(
            Chunk::from_bytes(b"short".to_vec()),
            Err(TambakError::FrameFormatError(_))
        ));
        let mut bytes = Chunk::compress(&ascending_i64(64), &config(0))
            .unwrap()
            .into_bytes();
        bytes.truncate(CHUNK_HEADER_SIZE + 4);
        assert!(Chunk::from_bytes(bytes).is_err());
    }

    fn crafted_header(nblocks: u32, block_size: u32, nbytes: u64) -> Vec<u8> {
        let mut bytes = vec![0u8, 1, 0, CodecId::Zstd.to_byte()];
        bytes.extend_from_slice(&nblocks.to_le_bytes());
        bytes.extend_from_slice(&block_size.to_le_bytes());
        bytes.extend_from_slice(&nbytes.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_crafted_block_layouts_are_rejected() {
        // Compressed chunk that claims data but no blocks.
        let no_blocks = crafted_header(0, 0, 16);
        assert!(matches!(
            Chunk::from_bytes(no_blocks),
            Err(TambakError::FrameFormatError(_))
        ));

        // Consistent layout whose block index is cut off.
        let truncated_index = crafted_header(2, 8, 16);
        assert!(matches!(
            Chunk::from_bytes(truncated_index),
            Err(TambakError::FrameFormatError(_))
        ));

        // Memcpyed chunk whose size would overflow the payload bound.
        let mut huge = crafted_header(0, 0, u64::MAX);
        huge[0] = FLAG_MEMCPYED;
        assert!(Chunk::from_bytes(huge).is_err());
    }

    #[test]
    fn test_stored_checksum_is_crc32_of_raw_bytes() {
        let raw = ascending_i64(300);
        let chunk = Chunk::compress(&raw, &config(512)).unwrap();
        assert_eq!(chunk.header().checksum, crc32fast::hash(&raw));
        let reparsed = Chunk::peek_header(chunk.as_bytes()).unwrap();
        assert_eq!(reparsed.checksum, crc32fast::hash(&raw));
    }
}
