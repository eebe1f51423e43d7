//! The contiguous layout: header and all chunk payloads in one byte buffer.

use std::sync::Arc;

use crate::error::{Result, TambakError};
use crate::frame::format::{FrameHeader, IndexEntry, FRAME_FORMAT_VERSION};
use crate::store::{Chunk, ChunkStore, MetadataStore};

/// Builds the header describing `store`. Compacts the metadata first.
pub(crate) fn build_header(store: &ChunkStore, flags: u16) -> Result<(FrameHeader, Vec<Arc<Chunk>>)> {
    let chunks = store.chunks()?;
    let dropped = store.metadata_mut().compact();
    if dropped > 0 {
        log::debug!("compacted {} deleted metadata entries before serialization", dropped);
    }
    let metadata = store
        .metadata()
        .raw_entries()
        .map(|(k, v)| (k.to_string(), v.to_vec()))
        .collect();
    let index = chunks
        .iter()
        .map(|c| IndexEntry {
            cbytes: c.cbytes(),
            nbytes: c.nbytes(),
        })
        .collect();
    let header = FrameHeader {
        version: FRAME_FORMAT_VERSION,
        flags,
        codec: store.codec().clone(),
        chunk_nbytes: store.chunk_nbytes(),
        nbytes: store.nbytes(),
        allow_resize: store.allows_resize(),
        metadata,
        index,
        header_size: 0,
    };
    Ok((header, chunks))
}

/// Rebuilds the metadata store from the header's raw entries.
pub(crate) fn restore_metadata(header: &FrameHeader) -> Result<MetadataStore> {
    let mut metadata = MetadataStore::default();
    for (key, value) in &header.metadata {
        metadata.insert_raw(key.clone(), value.clone())?;
    }
    Ok(metadata)
}

/// Checks a payload read back from a frame against its index row.
pub(crate) fn restore_chunk(position: usize, bytes: Vec<u8>, entry: &IndexEntry) -> Result<Chunk> {
    let chunk = Chunk::from_bytes(bytes)?;
    if chunk.nbytes() != entry.nbytes {
        return Err(TambakError::FrameFormatError(format!(
            "chunk {} declares {} bytes but the index says {}",
            position,
            chunk.nbytes(),
            entry.nbytes
        )));
    }
    Ok(chunk)
}

/// Serializes `store` as a single contiguous frame.
pub fn to_frame(store: &ChunkStore) -> Result<Vec<u8>> {
    let (header, chunks) = build_header(store, 0)?;
    let mut frame = header.to_bytes()?;
    frame.reserve(header.payload_size()?);
    for chunk in &chunks {
        frame.extend_from_slice(chunk.as_bytes());
    }
    log_metric!(
        "event" = "write_frame",
        "nchunks" = &chunks.len(),
        "nbytes" = &header.nbytes,
        "frame_bytes" = &frame.len()
    );
    Ok(frame)
}

/// Deserializes a contiguous frame into a fresh chunk store.
pub fn from_frame(bytes: &[u8]) -> Result<ChunkStore> {
    let header = FrameHeader::peek(bytes)?;
    if header.is_sparse() {
        return Err(TambakError::FrameFormatError(
            "frame header belongs to a sparse layout; open it with open_sparse".into(),
        ));
    }
    let expected = header
        .payload_size()?
        .checked_add(header.header_size)
        .ok_or_else(|| TambakError::FrameFormatError("frame payload size overflows".into()))?;
    if bytes.len() < expected {
        return Err(TambakError::FrameFormatError(format!(
            "frame is truncated: need {} bytes, got {}",
            expected,
            bytes.len()
        )));
    }

    let mut offset = header.header_size;
    let mut chunks = Vec::with_capacity(header.index.len());
    for (position, entry) in header.index.iter().enumerate() {
        let payload = bytes[offset..offset + entry.cbytes].to_vec();
        chunks.push(restore_chunk(position, payload, entry)?);
        offset += entry.cbytes;
    }

    let metadata = restore_metadata(&header)?;
    ChunkStore::from_parts(
        header.codec,
        header.chunk_nbytes,
        header.allow_resize,
        chunks,
        metadata,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;
    use crate::store::MetaValue;

    fn sample_store() -> ChunkStore {
        let store = ChunkStore::new(
            CodecConfig {
                typesize: 8,
                ..CodecConfig::default()
            },
            800,
        )
        .unwrap();
        let raw: Vec<u8> = (0..250i64).flat_map(|v| v.to_le_bytes()).collect();
        for piece in raw.chunks(800) {
            store.append(piece).unwrap();
        }
        store.metadata_mut().set("shape", MetaValue::from_shape(&[250])).unwrap();
        store.metadata_mut().set("scratch", 1i64).unwrap();
        store.metadata_mut().delete("scratch").unwrap();
        store
    }

    #[test]
    fn test_frame_roundtrip() {
        let store = sample_store();
        let frame = to_frame(&store).unwrap();
        let restored = from_frame(&frame).unwrap();

        assert_eq!(restored.nchunks(), 3);
        assert_eq!(restored.nbytes(), 2000);
        assert_eq!(
            restored.read_bytes(0, 2000).unwrap(),
            store.read_bytes(0, 2000).unwrap()
        );
        let meta = restored.metadata();
        assert_eq!(meta.keys(), vec!["shape"]);
        assert_eq!(meta.get("shape").unwrap().to_shape().unwrap(), vec![250]);
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let frame = to_frame(&sample_store()).unwrap();
        assert!(matches!(
            from_frame(&frame[..frame.len() - 1]),
            Err(TambakError::FrameFormatError(_))
        ));
    }

    #[test]
    fn test_overflowing_chunk_index_is_rejected() {
        let store = sample_store();
        let (mut header, _) = build_header(&store, 0).unwrap();
        header.nbytes = 2;
        header.index = vec![
            IndexEntry { cbytes: 8, nbytes: usize::MAX },
            IndexEntry { cbytes: 8, nbytes: 3 },
        ];
        let frame = header.to_bytes().unwrap();
        assert!(matches!(
            from_frame(&frame),
            Err(TambakError::FrameFormatError(_))
        ));

        header.nbytes = 2000;
        header.index = vec![
            IndexEntry { cbytes: usize::MAX - 4, nbytes: 1000 },
            IndexEntry { cbytes: 16, nbytes: 1000 },
        ];
        let frame = header.to_bytes().unwrap();
        assert!(matches!(
            from_frame(&frame),
            Err(TambakError::FrameFormatError(_))
        ));
    }

    #[test]
    fn test_corrupt_payload_reports_chunk_index() {
        let mut frame = to_frame(&sample_store()).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x55;
        let store = from_frame(&frame).unwrap();
        let err = store.get_chunk(2).unwrap_err();
        match err {
            TambakError::ChecksumMismatch { chunk, .. } | TambakError::Codec { chunk, .. } => {
                assert_eq!(chunk, 2)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
