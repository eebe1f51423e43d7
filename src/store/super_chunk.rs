//! The chunk store (super-chunk): an ordered, index-addressable sequence of
//! independently compressed chunks plus its attached metadata.
//!
//! Concurrency contract: any number of threads may read at once. Writers that
//! target disjoint, pre-reserved indices may run concurrently: they compress
//! outside the lock and only take the index-table write lock to place the
//! finished chunk. Every mutation bumps a revision counter so readers holding
//! an older snapshot can detect that the store changed under them.
//!
//! A store opened from persistent storage may start with pending slots: only
//! their sizes are known, and the chunk is fetched from a [`ChunkSource`] the
//! first time it is read. Filling a pending slot is not a mutation.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::CodecConfig;
use crate::error::{Result, TambakError};
use crate::store::chunk::Chunk;
use crate::store::metadata::MetadataStore;

/// Where a store's pending chunks come from.
pub trait ChunkSource: Send + Sync + std::fmt::Debug {
    /// Fetches and parses chunk `position`.
    fn load(&self, position: usize) -> Result<Chunk>;
}

#[derive(Debug, Clone)]
enum Slot {
    /// Reserved but not written yet.
    Reserved,
    Loaded(Arc<Chunk>),
    /// Described by the frame index; fetched from the store's source on first read.
    Pending { nbytes: usize, cbytes: usize },
}

impl Slot {
    /// Uncompressed size, if the slot holds (or will hold) a chunk.
    fn nbytes(&self) -> Option<usize> {
        match self {
            Slot::Reserved => None,
            Slot::Loaded(chunk) => Some(chunk.nbytes()),
            Slot::Pending { nbytes, .. } => Some(*nbytes),
        }
    }

    fn cbytes(&self) -> usize {
        match self {
            Slot::Reserved => 0,
            Slot::Loaded(chunk) => chunk.cbytes(),
            Slot::Pending { cbytes, .. } => *cbytes,
        }
    }
}

/// The chunk index table, guarded by the store's lock.
#[derive(Debug, Default)]
struct ChunkIndex {
    slots: Vec<Slot>,
    /// Logical byte offset of every chunk. Rebuilt when chunks change size.
    starts: Vec<usize>,
    nbytes: usize,
}

impl ChunkIndex {
    fn rebuild(&mut self, nominal: usize) {
        self.starts.clear();
        let mut offset = 0;
        for slot in &self.slots {
            self.starts.push(offset);
            offset += slot.nbytes().unwrap_or(nominal);
        }
        self.nbytes = offset;
    }
}

#[derive(Debug)]
pub struct ChunkStore {
    codec: CodecConfig,
    /// The uncompressed size of every chunk except possibly the last.
    chunk_nbytes: usize,
    allow_resize: bool,
    index: RwLock<ChunkIndex>,
    revision: AtomicU64,
    metadata: RwLock<MetadataStore>,
    source: Option<Arc<dyn ChunkSource>>,
}

impl ChunkStore {
    /// Creates an empty store. `chunk_nbytes` is the nominal chunk size.
    pub fn new(codec: CodecConfig, chunk_nbytes: usize) -> Result<Self> {
        codec.validate()?;
        if chunk_nbytes == 0 {
            return Err(TambakError::InvalidParameter(
                "chunk size must be greater than zero".into(),
            ));
        }
        Ok(Self {
            codec,
            chunk_nbytes,
            allow_resize: false,
            index: RwLock::new(ChunkIndex::default()),
            revision: AtomicU64::new(0),
            metadata: RwLock::new(MetadataStore::default()),
            source: None,
        })
    }

    /// Allows `replace` to change a chunk's uncompressed size.
    pub fn with_resize(mut self, allow: bool) -> Self {
        self.allow_resize = allow;
        self
    }

    pub fn codec(&self) -> &CodecConfig {
        &self.codec
    }

    pub fn chunk_nbytes(&self) -> usize {
        self.chunk_nbytes
    }

    pub fn allows_resize(&self) -> bool {
        self.allow_resize
    }

    pub fn nchunks(&self) -> usize {
        self.index.read().slots.len()
    }

    /// Total logical (uncompressed) length in bytes.
    pub fn nbytes(&self) -> usize {
        self.index.read().nbytes
    }

    /// Total stored size of all written chunks, loaded or not.
    pub fn cbytes(&self) -> usize {
        self.index.read().slots.iter().map(Slot::cbytes).sum()
    }

    /// Number of chunks held in memory. Less than `nchunks` while pending
    /// chunks of a lazily opened store have not been read.
    pub fn nloaded(&self) -> usize {
        self.index
            .read()
            .slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Loaded(_)))
            .count()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Fails with `ConcurrentModification` if the store changed since `expected`.
    pub fn check_revision(&self, expected: u64) -> Result<()> {
        let found = self.revision();
        if found != expected {
            return Err(TambakError::ConcurrentModification { expected, found });
        }
        Ok(())
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    pub fn metadata(&self) -> RwLockReadGuard<'_, MetadataStore> {
        self.metadata.read()
    }

    pub fn metadata_mut(&self) -> RwLockWriteGuard<'_, MetadataStore> {
        self.metadata.write()
    }

    //==============================================================================
    // Writes
    //==============================================================================

    /// Compresses `raw` and appends it. Returns the new chunk's index.
    pub fn append(&self, raw: &[u8]) -> Result<usize> {
        if raw.is_empty() || raw.len() > self.chunk_nbytes {
            return Err(TambakError::InvalidParameter(format!(
                "appended chunk must hold 1..={} bytes, got {}",
                self.chunk_nbytes,
                raw.len()
            )));
        }
        let next = self.nchunks();
        let chunk = Chunk::compress(raw, &self.codec).map_err(|e| e.at_chunk(next))?;
        self.append_compressed(chunk)
    }

    /// Appends an already compressed chunk.
    pub fn append_compressed(&self, chunk: Chunk) -> Result<usize> {
        let mut index = self.index.write();
        if let Some(last) = index.slots.last().and_then(Slot::nbytes) {
            if last != self.chunk_nbytes && !self.allow_resize {
                return Err(TambakError::InvalidParameter(format!(
                    "cannot append after short chunk {} ({} of {} bytes)",
                    index.slots.len() - 1,
                    last,
                    self.chunk_nbytes
                )));
            }
        }
        let position = index.slots.len();
        let offset = index.nbytes;
        index.starts.push(offset);
        index.nbytes = offset + chunk.nbytes();
        index.slots.push(Slot::Loaded(Arc::new(chunk)));
        drop(index);
        self.bump();
        Ok(position)
    }

    /// Reserves `count` empty slots at the end. Returns the first reserved index.
    /// Slots are filled with [`ChunkStore::insert_compressed`].
    pub fn reserve(&self, count: usize) -> usize {
        let mut index = self.index.write();
        let first = index.slots.len();
        index.slots.resize(first + count, Slot::Reserved);
        index.rebuild(self.chunk_nbytes);
        drop(index);
        self.bump();
        first
    }

    /// Places a compressed chunk into a reserved slot. Each slot may be filled once.
    pub fn insert_compressed(&self, position: usize, chunk: Chunk) -> Result<()> {
        if chunk.nbytes() != self.chunk_nbytes && !self.allow_resize {
            return Err(TambakError::InvalidParameter(format!(
                "chunk {} holds {} bytes, store expects {}",
                position,
                chunk.nbytes(),
                self.chunk_nbytes
            )));
        }
        let mut index = self.index.write();
        let nslots = index.slots.len();
        let slot = index.slots.get_mut(position).ok_or_else(|| {
            TambakError::IndexOutOfRange(format!(
                "chunk index {} out of range for {} chunks",
                position, nslots
            ))
        })?;
        if !matches!(slot, Slot::Reserved) {
            return Err(TambakError::InternalError(format!(
                "chunk slot {} was written twice",
                position
            )));
        }
        *slot = Slot::Loaded(Arc::new(chunk));
        if self.allow_resize {
            index.rebuild(self.chunk_nbytes);
        }
        drop(index);
        self.bump();
        Ok(())
    }

    /// Overwrites chunk `position` with `raw`.
    pub fn replace(&self, position: usize, raw: &[u8]) -> Result<()> {
        let old = self.chunk(position)?;
        let resized = old.nbytes() != raw.len();
        if resized && !self.allow_resize {
            return Err(TambakError::InvalidParameter(format!(
                "replacement for chunk {} is {} bytes, expected {}",
                position,
                raw.len(),
                old.nbytes()
            )));
        }
        let chunk = Chunk::compress(raw, &self.codec).map_err(|e| e.at_chunk(position))?;
        let mut index = self.index.write();
        index.slots[position] = Slot::Loaded(Arc::new(chunk));
        if resized {
            log::debug!("chunk {} resized, rebuilding chunk index", position);
            index.rebuild(self.chunk_nbytes);
        }
        drop(index);
        self.bump();
        Ok(())
    }

    //==============================================================================
    // Reads
    //==============================================================================

    /// The compressed chunk at `position`.
    pub fn chunk(&self, position: usize) -> Result<Arc<Chunk>> {
        let nbytes = {
            let index = self.index.read();
            match index.slots.get(position) {
                Some(Slot::Loaded(chunk)) => return Ok(Arc::clone(chunk)),
                Some(Slot::Pending { nbytes, .. }) => *nbytes,
                Some(Slot::Reserved) => {
                    return Err(TambakError::IndexOutOfRange(format!(
                        "chunk {} has been reserved but not written",
                        position
                    )))
                }
                None => {
                    return Err(TambakError::IndexOutOfRange(format!(
                        "chunk index {} out of range for {} chunks",
                        position,
                        index.slots.len()
                    )))
                }
            }
        };
        self.load_pending(position, nbytes)
    }

    /// Fetches a pending chunk outside the lock, then publishes it. If another
    /// reader got there first, its copy wins.
    fn load_pending(&self, position: usize, nbytes: usize) -> Result<Arc<Chunk>> {
        let source = self.source.as_ref().ok_or_else(|| {
            TambakError::InternalError(format!("chunk {} is pending but the store has no source", position))
        })?;
        let chunk = source.load(position).map_err(|e| e.at_chunk(position))?;
        if chunk.nbytes() != nbytes {
            return Err(TambakError::FrameFormatError(format!(
                "chunk {} holds {} bytes, index says {}",
                position,
                chunk.nbytes(),
                nbytes
            )));
        }
        let mut index = self.index.write();
        match &index.slots[position] {
            Slot::Loaded(existing) => Ok(Arc::clone(existing)),
            _ => {
                let chunk = Arc::new(chunk);
                index.slots[position] = Slot::Loaded(Arc::clone(&chunk));
                log::trace!("loaded pending chunk {}", position);
                Ok(chunk)
            }
        }
    }

    /// Decompresses chunk `position` into `out`, which must be sized to the chunk.
    pub fn get(&self, position: usize, out: &mut [u8]) -> Result<()> {
        let chunk = self.chunk(position)?;
        chunk.decompress_into(out).map_err(|e| e.at_chunk(position))
    }

    /// Decompresses chunk `position` into a new buffer.
    pub fn get_chunk(&self, position: usize) -> Result<Vec<u8>> {
        let chunk = self.chunk(position)?;
        chunk.decompress().map_err(|e| e.at_chunk(position))
    }

    /// Decompresses only the blocks of chunk `position` overlapping the byte range.
    pub fn get_range(&self, position: usize, start: usize, len: usize) -> Result<Vec<u8>> {
        let chunk = self.chunk(position)?;
        chunk
            .decompress_range(start, len)
            .map_err(|e| e.at_chunk(position))
    }

    /// Reads `len` bytes at logical offset `start`, spanning chunks as needed.
    pub fn read_bytes(&self, start: usize, len: usize) -> Result<Vec<u8>> {
        let (starts, total) = {
            let index = self.index.read();
            (index.starts.clone(), index.nbytes)
        };
        if start.saturating_add(len) > total {
            return Err(TambakError::IndexOutOfRange(format!(
                "byte range {}..{} outside store of {} bytes",
                start,
                start.saturating_add(len),
                total
            )));
        }
        let mut out = Vec::with_capacity(len);
        let end = start + len;
        // The chunk containing `start`.
        let mut position = starts.partition_point(|&s| s <= start).saturating_sub(1);
        while out.len() < len {
            let chunk_start = starts[position];
            let chunk = self.chunk(position)?;
            let lo = start.max(chunk_start) - chunk_start;
            let hi = end.min(chunk_start + chunk.nbytes()) - chunk_start;
            if hi > lo {
                out.extend(
                    chunk
                        .decompress_range(lo, hi - lo)
                        .map_err(|e| e.at_chunk(position))?,
                );
            }
            position += 1;
        }
        Ok(out)
    }

    /// Snapshot of the written chunks in index order, for serialization.
    /// Pending chunks are loaded.
    pub(crate) fn chunks(&self) -> Result<Vec<Arc<Chunk>>> {
        (0..self.nchunks()).map(|i| self.chunk(i)).collect()
    }

    /// Rebuilds a store from parts read back from a frame.
    pub(crate) fn from_parts(
        codec: CodecConfig,
        chunk_nbytes: usize,
        allow_resize: bool,
        chunks: Vec<Chunk>,
        metadata: MetadataStore,
    ) -> Result<Self> {
        let store = Self::new(codec, chunk_nbytes)?.with_resize(allow_resize);
        {
            let mut index = store.index.write();
            index.slots = chunks.into_iter().map(|c| Slot::Loaded(Arc::new(c))).collect();
            index.rebuild(chunk_nbytes);
        }
        *store.metadata.write() = metadata;
        Ok(store)
    }

    /// Builds a store whose chunks stay in `source` until first read.
    /// `sizes` holds `(uncompressed, compressed)` bytes per chunk.
    pub(crate) fn from_source(
        codec: CodecConfig,
        chunk_nbytes: usize,
        allow_resize: bool,
        sizes: impl IntoIterator<Item = (usize, usize)>,
        source: Arc<dyn ChunkSource>,
        metadata: MetadataStore,
    ) -> Result<Self> {
        let mut store = Self::new(codec, chunk_nbytes)?.with_resize(allow_resize);
        {
            let mut index = store.index.write();
            index.slots = sizes
                .into_iter()
                .map(|(nbytes, cbytes)| Slot::Pending { nbytes, cbytes })
                .collect();
            index.rebuild(chunk_nbytes);
        }
        *store.metadata.write() = metadata;
        store.source = Some(source);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn store(chunk_nbytes: usize) -> ChunkStore {
        ChunkStore::new(
            CodecConfig {
                typesize: 4,
                ..CodecConfig::default()
            },
            chunk_nbytes,
        )
        .unwrap()
    }

    fn bytes_of(values: std::ops::Range<u32>) -> Vec<u8> {
        values.flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_append_and_get() {
        let store = store(400);
        assert_eq!(store.append(&bytes_of(0..100)).unwrap(), 0);
        assert_eq!(store.append(&bytes_of(100..150)).unwrap(), 1);
        assert_eq!(store.nchunks(), 2);
        assert_eq!(store.nbytes(), 600);

        let mut out = vec![0u8; 200];
        store.get(1, &mut out).unwrap();
        assert_eq!(out, bytes_of(100..150));
        assert!(matches!(
            store.get_chunk(2),
            Err(TambakError::IndexOutOfRange(_))
        ));
    }

    #[test]
    fn test_only_last_chunk_may_be_short() {
        let store = store(400);
        store.append(&bytes_of(0..50)).unwrap();
        assert!(store.append(&bytes_of(0..100)).is_err());
    }

    #[test]
    fn test_replace_bumps_revision_and_checks_size() {
        let store = store(400);
        store.append(&bytes_of(0..100)).unwrap();
        let snapshot = store.revision();

        store.replace(0, &bytes_of(1000..1100)).unwrap();
        assert_eq!(store.get_chunk(0).unwrap(), bytes_of(1000..1100));
        assert!(matches!(
            store.check_revision(snapshot),
            Err(TambakError::ConcurrentModification { .. })
        ));
        assert!(store.replace(0, &bytes_of(0..10)).is_err());
    }

    #[test]
    fn test_resizable_store_rebuilds_index() {
        let store = store(400).with_resize(true);
        store.append(&bytes_of(0..100)).unwrap();
        store.append(&bytes_of(100..200)).unwrap();
        store.replace(0, &bytes_of(0..10)).unwrap();
        assert_eq!(store.nbytes(), 440);
        let expected: Vec<u8> = bytes_of(9..10).into_iter().chain(bytes_of(100..101)).collect();
        assert_eq!(store.read_bytes(36, 8).unwrap(), expected);
    }

    #[test]
    fn test_read_bytes_spans_chunks() {
        let store = store(400);
        store.append(&bytes_of(0..100)).unwrap();
        store.append(&bytes_of(100..200)).unwrap();
        store.append(&bytes_of(200..230)).unwrap();
        assert_eq!(store.read_bytes(396, 412).unwrap(), bytes_of(99..202));
        assert!(store.read_bytes(900, 40).is_err());
    }

    #[derive(Debug)]
    struct CountingSource {
        chunks: Vec<Chunk>,
        loads: std::sync::atomic::AtomicUsize,
    }

    impl ChunkSource for CountingSource {
        fn load(&self, position: usize) -> Result<Chunk> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.chunks[position].clone())
        }
    }

    #[test]
    fn test_pending_chunks_load_once_on_first_read() {
        let codec = CodecConfig {
            typesize: 4,
            ..CodecConfig::default()
        };
        let chunks: Vec<Chunk> = [0..100, 100..200, 200..250]
            .into_iter()
            .map(|r| Chunk::compress(&bytes_of(r), &codec).unwrap())
            .collect();
        let sizes: Vec<(usize, usize)> = chunks.iter().map(|c| (c.nbytes(), c.cbytes())).collect();
        let cbytes: usize = sizes.iter().map(|&(_, c)| c).sum();
        let source = Arc::new(CountingSource {
            chunks,
            loads: std::sync::atomic::AtomicUsize::new(0),
        });
        let store = ChunkStore::from_source(
            codec,
            400,
            false,
            sizes,
            Arc::clone(&source) as Arc<dyn ChunkSource>,
            MetadataStore::default(),
        )
        .unwrap();

        assert_eq!(store.nbytes(), 1000);
        assert_eq!(store.cbytes(), cbytes);
        assert_eq!(store.nloaded(), 0);
        let revision = store.revision();

        assert_eq!(store.read_bytes(400, 8).unwrap(), bytes_of(100..102));
        assert_eq!(store.get_chunk(1).unwrap(), bytes_of(100..200));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert_eq!(store.nloaded(), 1);
        assert_eq!(store.revision(), revision);

        assert_eq!(store.chunks().unwrap().len(), 3);
        assert_eq!(source.loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_parallel_writers_fill_reserved_slots() {
        let store = Arc::new(store(400));
        let first = store.reserve(8);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let start = (i * 100) as u32;
                    let chunk =
                        Chunk::compress(&bytes_of(start..start + 100), store.codec()).unwrap();
                    store.insert_compressed(first + i, chunk).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.read_bytes(0, 3200).unwrap(), bytes_of(0..800));

        let again = Chunk::compress(&bytes_of(0..100), store.codec()).unwrap();
        assert!(store.insert_compressed(0, again).is_err());
    }
}
