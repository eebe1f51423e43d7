//! The sparse layout: a directory holding the frame header plus one file per
//! chunk, so a single chunk can be read without touching the others.
//!
//! ```text
//! <dir>/frame.hdr
//! <dir>/chunks/00000000.chunk
//! <dir>/chunks/00000001.chunk
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, TambakError};
use crate::frame::contiguous::{build_header, restore_chunk, restore_metadata};
use crate::frame::format::{FrameHeader, FLAG_SPARSE};
use crate::store::{Chunk, ChunkSource, ChunkStore};

pub const HEADER_FILE: &str = "frame.hdr";
pub const CHUNKS_DIR: &str = "chunks";

fn chunk_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(CHUNKS_DIR).join(format!("{:08}.chunk", index))
}

/// Writes `store` as a sparse frame under `dir`, replacing any previous chunk
/// files there. Returns the total number of bytes written.
pub fn write_sparse(store: &ChunkStore, dir: impl AsRef<Path>) -> Result<u64> {
    let dir = dir.as_ref();
    // Collect every chunk first: `store` may have been opened lazily from `dir`.
    let (header, chunks) = build_header(store, FLAG_SPARSE)?;
    let header_bytes = header.to_bytes()?;

    let chunks_dir = dir.join(CHUNKS_DIR);
    if chunks_dir.exists() {
        fs::remove_dir_all(&chunks_dir)?;
    }
    fs::create_dir_all(&chunks_dir)?;
    fs::write(dir.join(HEADER_FILE), &header_bytes)?;

    let mut written = header_bytes.len() as u64;
    for (index, chunk) in chunks.iter().enumerate() {
        fs::write(chunk_path(dir, index), chunk.as_bytes())?;
        written += chunk.cbytes() as u64;
    }
    log::info!(
        "wrote sparse frame with {} chunks ({} bytes) to {}",
        chunks.len(),
        written,
        dir.display()
    );
    Ok(written)
}

/// Opens a sparse frame as a chunk store. Only the header is read here; each
/// chunk file is read the first time its chunk is accessed.
pub fn open_sparse(dir: impl AsRef<Path>) -> Result<ChunkStore> {
    SparseFrame::open(dir)?.into_store()
}

/// An opened sparse frame. Only the header is held in memory.
#[derive(Debug, Clone)]
pub struct SparseFrame {
    dir: PathBuf,
    header: FrameHeader,
}

impl SparseFrame {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let bytes = fs::read(dir.join(HEADER_FILE))?;
        let header = FrameHeader::peek(&bytes)?;
        if !header.is_sparse() {
            return Err(TambakError::FrameFormatError(format!(
                "{} is not a sparse frame header",
                dir.join(HEADER_FILE).display()
            )));
        }
        Ok(Self { dir, header })
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn nchunks(&self) -> usize {
        self.header.index.len()
    }

    /// Reads chunk `index` from its own file.
    pub fn read_chunk(&self, index: usize) -> Result<Chunk> {
        let entry = self.header.index.get(index).ok_or_else(|| {
            TambakError::IndexOutOfRange(format!(
                "chunk index {} out of range for {} chunks",
                index,
                self.nchunks()
            ))
        })?;
        let bytes = fs::read(chunk_path(&self.dir, index))?;
        if bytes.len() != entry.cbytes {
            return Err(TambakError::FrameFormatError(format!(
                "chunk file {} holds {} bytes, index says {}",
                index,
                bytes.len(),
                entry.cbytes
            )));
        }
        restore_chunk(index, bytes, entry)
    }

    /// Wraps the frame in a store that reads chunk files on demand.
    pub fn into_store(self) -> Result<ChunkStore> {
        let metadata = restore_metadata(&self.header)?;
        let sizes: Vec<(usize, usize)> = self
            .header
            .index
            .iter()
            .map(|e| (e.nbytes, e.cbytes))
            .collect();
        let (codec, chunk_nbytes, allow_resize) = (
            self.header.codec.clone(),
            self.header.chunk_nbytes,
            self.header.allow_resize,
        );
        log::debug!(
            "opened sparse frame {} with {} chunks",
            self.dir.display(),
            sizes.len()
        );
        ChunkStore::from_source(codec, chunk_nbytes, allow_resize, sizes, Arc::new(self), metadata)
    }
}

impl ChunkSource for SparseFrame {
    fn load(&self, position: usize) -> Result<Chunk> {
        self.read_chunk(position)
    }
}
