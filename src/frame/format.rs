// In: src/frame/format.rs

//! Defines the on-disk header shared by the contiguous and sparse layouts.
//! This is the single source of truth for the frame magic, versioning, and the
//! encoding of the codec config, metadata and chunk index.
//!
//! ```text
//! magic "TBKF" | version u16 | flags u16 | header_len u32 | header
//! header = codec json (u32 len) | chunk_nbytes u64 | nbytes u64 | allow_resize u8
//!        | meta count u32 | (key u16 len, value u32 len)* | nchunks u64
//!        | (compressed u64, uncompressed u64)*
//! ```

use std::io::{Cursor, Read};

use crate::config::CodecConfig;
use crate::error::{Result, TambakError};

//==================================================================================
// Format Constants
//==================================================================================

/// The magic number to identify the start of a tambak frame.
pub const FRAME_MAGIC: &[u8; 4] = b"TBKF";
/// The current (and newest readable) version of the frame format.
pub const FRAME_FORMAT_VERSION: u16 = 1;
/// magic(4) + version(2) + flags(2) + header_len(4)
pub const FRAME_PREFIX_SIZE: usize = 12;

/// Chunk payloads live in separate units next to the header.
pub const FLAG_SPARSE: u16 = 0b0000_0001;

/// A reasonable limit to prevent OOM from malformed string lengths. (16MB)
const MAX_REASONABLE_STRING_LEN: usize = 16 * 1024 * 1024;

//==================================================================================
// Public Structs
//==================================================================================

/// One row of the chunk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub cbytes: usize,
    pub nbytes: usize,
}

/// Everything in a frame except the chunk payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub version: u16,
    pub flags: u16,
    pub codec: CodecConfig,
    pub chunk_nbytes: usize,
    pub nbytes: usize,
    pub allow_resize: bool,
    /// Metadata entries in their stored (encoded and compressed) form.
    pub metadata: Vec<(String, Vec<u8>)>,
    pub index: Vec<IndexEntry>,
    /// Size of prefix plus header; payloads start here in a contiguous frame.
    pub header_size: usize,
}

impl FrameHeader {
    pub fn is_sparse(&self) -> bool {
        self.flags & FLAG_SPARSE != 0
    }

    /// Sum of all compressed chunk sizes.
    pub fn payload_size(&self) -> Result<usize> {
        checked_total(self.index.iter().map(|e| e.cbytes), "compressed")
    }

    /// Serializes prefix plus header.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header_buf = Vec::new();
        let codec_json = serde_json::to_string(&self.codec)?;
        write_prefixed(&mut header_buf, codec_json.as_bytes(), 4)?;
        header_buf.extend_from_slice(&(self.chunk_nbytes as u64).to_le_bytes());
        header_buf.extend_from_slice(&(self.nbytes as u64).to_le_bytes());
        header_buf.push(self.allow_resize as u8);

        header_buf.extend_from_slice(&(self.metadata.len() as u32).to_le_bytes());
        for (key, value) in &self.metadata {
            write_prefixed(&mut header_buf, key.as_bytes(), 2)?;
            write_prefixed(&mut header_buf, value, 4)?;
        }

        header_buf.extend_from_slice(&(self.index.len() as u64).to_le_bytes());
        for entry in &self.index {
            header_buf.extend_from_slice(&(entry.cbytes as u64).to_le_bytes());
            header_buf.extend_from_slice(&(entry.nbytes as u64).to_le_bytes());
        }

        let mut final_buf = Vec::with_capacity(FRAME_PREFIX_SIZE + header_buf.len());
        final_buf.extend_from_slice(FRAME_MAGIC);
        final_buf.extend_from_slice(&FRAME_FORMAT_VERSION.to_le_bytes());
        final_buf.extend_from_slice(&self.flags.to_le_bytes());
        final_buf.extend_from_slice(&(header_buf.len() as u32).to_le_bytes());
        final_buf.extend_from_slice(&header_buf);
        Ok(final_buf)
    }

    /// Parses prefix plus header without touching any payload bytes.
    pub fn peek(bytes: &[u8]) -> Result<FrameHeader> {
        if bytes.len() < FRAME_PREFIX_SIZE {
            return Err(TambakError::FrameFormatError(format!(
                "Frame is too small to be valid. Minimum size: {}, got: {}",
                FRAME_PREFIX_SIZE,
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let mut magic_buf = [0u8; 4];
        read_exact(&mut cursor, &mut magic_buf)?;
        if magic_buf != *FRAME_MAGIC {
            return Err(TambakError::FrameFormatError(
                "Invalid frame magic number".into(),
            ));
        }

        let version = read_u16(&mut cursor)?;
        if version > FRAME_FORMAT_VERSION {
            return Err(TambakError::IncompatibleVersion {
                found: version,
                supported: FRAME_FORMAT_VERSION,
            });
        }
        if version == 0 {
            return Err(TambakError::FrameFormatError("Frame version 0 is invalid".into()));
        }
        let flags = read_u16(&mut cursor)?;
        let header_len = read_u32(&mut cursor)? as usize;
        let header_size = FRAME_PREFIX_SIZE + header_len;
        // SECURITY: Validate that the declared header length doesn't exceed the buffer size.
        if bytes.len() < header_size {
            return Err(TambakError::FrameFormatError(
                "Header length exceeds buffer size".into(),
            ));
        }

        let mut header_cursor = Cursor::new(&bytes[FRAME_PREFIX_SIZE..header_size]);
        let codec_json = read_prefixed(&mut header_cursor, 4)?;
        let codec: CodecConfig = serde_json::from_slice(&codec_json)?;
        codec.validate()?;
        let chunk_nbytes = read_u64(&mut header_cursor)? as usize;
        let nbytes = read_u64(&mut header_cursor)? as usize;
        let mut flag_buf = [0u8; 1];
        read_exact(&mut header_cursor, &mut flag_buf)?;

        let meta_count = read_u32(&mut header_cursor)? as usize;
        let mut metadata = Vec::with_capacity(meta_count.min(1024));
        for _ in 0..meta_count {
            let key = String::from_utf8(read_prefixed(&mut header_cursor, 2)?)
                .map_err(|e| TambakError::FrameFormatError(e.to_string()))?;
            let value = read_prefixed(&mut header_cursor, 4)?;
            metadata.push((key, value));
        }

        let nchunks = read_u64(&mut header_cursor)? as usize;
        // Each index row is 16 bytes; reject counts the header cannot hold.
        if nchunks > header_len / 16 {
            return Err(TambakError::FrameFormatError(format!(
                "Chunk count {} does not fit a header of {} bytes",
                nchunks, header_len
            )));
        }
        let mut index = Vec::with_capacity(nchunks);
        for _ in 0..nchunks {
            let cbytes = read_u64(&mut header_cursor)? as usize;
            let nbytes = read_u64(&mut header_cursor)? as usize;
            index.push(IndexEntry { cbytes, nbytes });
        }

        let declared = checked_total(index.iter().map(|e| e.nbytes), "uncompressed")?;
        if declared != nbytes {
            return Err(TambakError::FrameFormatError(format!(
                "Chunk index covers {} bytes but the frame declares {}",
                declared, nbytes
            )));
        }

        Ok(FrameHeader {
            version,
            flags,
            codec,
            chunk_nbytes,
            nbytes,
            allow_resize: flag_buf[0] != 0,
            metadata,
            index,
            header_size,
        })
    }
}

//==================================================================================
// Private Helpers
//==================================================================================

/// Sums sizes read from the index, treating overflow as a corrupt frame.
fn checked_total(mut sizes: impl Iterator<Item = usize>, what: &str) -> Result<usize> {
    sizes
        .try_fold(0usize, |acc, size| acc.checked_add(size))
        .ok_or_else(|| {
            TambakError::FrameFormatError(format!("Chunk index {} sizes overflow", what))
        })
}

fn read_exact(cursor: &mut Cursor<&[u8]>, buf: &mut [u8]) -> Result<()> {
    cursor
        .read_exact(buf)
        .map_err(|e| TambakError::FrameFormatError(e.to_string()))
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    let mut buf = [0u8; 2];
    read_exact(cursor, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(cursor, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact(cursor, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_prefixed(cursor: &mut Cursor<&[u8]>, len_bytes: usize) -> Result<Vec<u8>> {
    let len = match len_bytes {
        2 => read_u16(cursor)? as usize,
        4 => read_u32(cursor)? as usize,
        _ => {
            return Err(TambakError::InternalError(
                "Unsupported length prefix size".into(),
            ))
        }
    };
    // SECURITY: Validate length against what is left before allocating.
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(TambakError::FrameFormatError(format!(
            "Declared length ({}) exceeds the remaining header ({})",
            len, remaining
        )));
    }
    let mut buf = vec![0; len];
    read_exact(cursor, &mut buf)?;
    Ok(buf)
}

fn write_prefixed(writer: &mut Vec<u8>, bytes: &[u8], len_bytes: usize) -> Result<()> {
    let len = bytes.len();
    match len_bytes {
        2 if len <= u16::MAX as usize => writer.extend_from_slice(&(len as u16).to_le_bytes()),
        4 if len <= MAX_REASONABLE_STRING_LEN => {
            writer.extend_from_slice(&(len as u32).to_le_bytes())
        }
        _ => {
            return Err(TambakError::FrameFormatError(format!(
                "Field of {} bytes does not fit a {}-byte length prefix",
                len, len_bytes
            )))
        }
    }
    writer.extend_from_slice(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> FrameHeader {
        FrameHeader {
            version: FRAME_FORMAT_VERSION,
            flags: 0,
            codec: CodecConfig::default(),
            chunk_nbytes: 1024,
            nbytes: 1524,
            allow_resize: false,
            metadata: vec![("shape".to_string(), vec![1, 2, 3])],
            index: vec![
                IndexEntry { cbytes: 100, nbytes: 1024 },
                IndexEntry { cbytes: 60, nbytes: 500 },
            ],
            header_size: 0,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample_header();
        let bytes = header.to_bytes().unwrap();
        let parsed = FrameHeader::peek(&bytes).unwrap();
        assert_eq!(parsed.header_size, bytes.len());
        assert_eq!(parsed.metadata, header.metadata);
        assert_eq!(parsed.index, header.index);
        assert_eq!(parsed.payload_size().unwrap(), 160);
        assert!(!parsed.is_sparse());
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let mut bytes = sample_header().to_bytes().unwrap();
        bytes[4..6].copy_from_slice(&(FRAME_FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(
            FrameHeader::peek(&bytes),
            Err(TambakError::IncompatibleVersion { found: 2, supported: 1 })
        ));
    }

    #[test]
    fn test_parsing_errors_are_handled_gracefully() {
        assert!(matches!(
            FrameHeader::peek(b"short"),
            Err(TambakError::FrameFormatError(_))
        ));
        assert!(matches!(
            FrameHeader::peek(b"BAD_MAGIC_and_the_rest_is_long_enough"),
            Err(TambakError::FrameFormatError(_))
        ));
        let bytes = sample_header().to_bytes().unwrap();
        assert!(FrameHeader::peek(&bytes[..30]).is_err());
    }

    #[test]
    fn test_overflowing_index_sizes_are_rejected() {
        let mut header = sample_header();
        header.index = vec![
            IndexEntry { cbytes: 10, nbytes: usize::MAX },
            IndexEntry { cbytes: 10, nbytes: 2 },
        ];
        let bytes = header.to_bytes().unwrap();
        assert!(matches!(
            FrameHeader::peek(&bytes),
            Err(TambakError::FrameFormatError(_))
        ));

        header.index = vec![
            IndexEntry { cbytes: usize::MAX, nbytes: 1024 },
            IndexEntry { cbytes: 2, nbytes: 500 },
        ];
        assert!(matches!(
            header.payload_size(),
            Err(TambakError::FrameFormatError(_))
        ));
    }
}
