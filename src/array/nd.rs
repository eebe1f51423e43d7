//! The chunked N-dimensional array.
//!
//! Each chunk holds the full chunk shape in C order, with edge chunks padded
//! with zeros, so every chunk of the backing store has the same nominal size.
//! Blocks are contiguous byte ranges of `prod(blocks) * itemsize` bytes inside
//! a chunk; region reads decompress only the blocks covering the touched span.

use ndarray::ArrayD;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use crate::array::buffer::{check_kind, Buffer};
use crate::array::fields::FieldView;
use crate::array::grid::{self, ChunkGrid};
use crate::array::region::{Region, Selection};
use crate::config::{ArrayParams, CodecConfig};
use crate::error::{Result, TambakError};
use crate::frame;
use crate::store::{Chunk, ChunkStore, MetaValue};
use crate::traits::{encode_elements, Element};
use crate::types::DType;

/// Metadata key holding `{shape, chunks, blocks, dtype}`.
pub const NDARRAY_META_KEY: &str = "ndarray";

#[derive(Debug)]
pub struct NDArray {
    shape: Vec<usize>,
    dtype: DType,
    chunks: Vec<usize>,
    blocks: Vec<usize>,
    grid: ChunkGrid,
    store: ChunkStore,
}

//==================================================================================
// Construction
//==================================================================================

impl NDArray {
    /// Creates an array with no chunks written yet. Callers fill every chunk
    /// (append or reserve + insert) before the array is read.
    pub(crate) fn allocate(
        shape: &[usize],
        dtype: DType,
        chunks: Vec<usize>,
        blocks: Vec<usize>,
        codec: &CodecConfig,
    ) -> Result<Self> {
        let itemsize = dtype.itemsize();
        if itemsize == 0 {
            return Err(TambakError::InvalidParameter(format!(
                "dtype {} has zero item size",
                dtype
            )));
        }
        let store_codec = CodecConfig {
            typesize: if itemsize <= 255 { itemsize } else { 1 },
            block_size: blocks.iter().product::<usize>() * itemsize,
            ..codec.clone()
        };
        let store = ChunkStore::new(store_codec, chunks.iter().product::<usize>() * itemsize)?;
        let array = Self {
            shape: shape.to_vec(),
            dtype,
            grid: ChunkGrid::new(shape, &chunks),
            chunks,
            blocks,
            store,
        };
        array
            .store
            .metadata_mut()
            .set(NDARRAY_META_KEY, array.geometry_meta())?;
        Ok(array)
    }

    /// An array of zeros. All chunks share one compressed zero chunk.
    pub fn zeros(shape: &[usize], dtype: DType, params: &ArrayParams) -> Result<Self> {
        let (chunks, blocks) = grid::resolve_geometry(
            shape,
            dtype.itemsize(),
            params.chunks.as_deref(),
            params.blocks.as_deref(),
        )?;
        let array = Self::allocate(shape, dtype, chunks, blocks, &params.codec)?;
        let nchunks = array.grid.nchunks();
        if nchunks > 0 {
            let zero = Chunk::compress(&vec![0u8; array.store.chunk_nbytes()], array.store.codec())?;
            for _ in 0..nchunks {
                array.store.append_compressed(zero.clone())?;
            }
        }
        Ok(array)
    }

    /// Chunks and compresses a C-contiguous buffer. Chunks are compressed in
    /// parallel and appended in index order.
    pub fn from_bytes(bytes: &[u8], shape: &[usize], dtype: DType, params: &ArrayParams) -> Result<Self> {
        let itemsize = dtype.itemsize();
        let expected = shape.iter().product::<usize>() * itemsize;
        if bytes.len() != expected {
            return Err(TambakError::ShapeMismatch(format!(
                "buffer of {} bytes does not match shape {:?} of {} ({} bytes)",
                bytes.len(),
                shape,
                dtype,
                expected
            )));
        }
        let (chunks, blocks) = grid::resolve_geometry(
            shape,
            itemsize,
            params.chunks.as_deref(),
            params.blocks.as_deref(),
        )?;
        let array = Self::allocate(shape, dtype, chunks, blocks, &params.codec)?;

        let compressed = (0..array.grid.nchunks())
            .into_par_iter()
            .map(|ci| {
                let cbox = array.grid.chunk_box(ci);
                let extent: Vec<usize> = cbox.iter().map(|r| r.len()).collect();
                let valid = grid::extract_box(bytes, shape, &cbox, itemsize);
                let raw = grid::pad_to_layout(&valid, &extent, &array.chunks, itemsize);
                Chunk::compress(&raw, array.store.codec()).map_err(|e| e.at_chunk(ci))
            })
            .collect::<Result<Vec<_>>>()?;
        for chunk in compressed {
            array.store.append_compressed(chunk)?;
        }
        log::debug!(
            "built array {:?} of {} in {} chunks ({} -> {} bytes)",
            array.shape,
            array.dtype,
            array.nchunks(),
            expected,
            array.cbytes()
        );
        Ok(array)
    }

    pub fn from_ndarray<T: Element>(array: &ArrayD<T>, params: &ArrayParams) -> Result<Self> {
        let values: Vec<T> = array.iter().copied().collect();
        Self::from_bytes(
            &encode_elements(&values),
            array.shape(),
            DType::Scalar(T::KIND),
            params,
        )
    }

    /// Rebuilds an array from a store carrying the `ndarray` metadata entry.
    pub fn from_store(store: ChunkStore) -> Result<Self> {
        let meta = store.metadata().get(NDARRAY_META_KEY)?;
        let map = meta.as_map().ok_or_else(|| {
            TambakError::FrameFormatError("ndarray metadata must be a map".into())
        })?;
        let entry = |key: &str| {
            map.get(key).ok_or_else(|| {
                TambakError::FrameFormatError(format!("ndarray metadata is missing '{}'", key))
            })
        };
        let shape = entry("shape")?.to_shape()?;
        let chunks = entry("chunks")?.to_shape()?;
        let blocks = entry("blocks")?.to_shape()?;
        let descriptor = entry("dtype")?.as_str().ok_or_else(|| {
            TambakError::FrameFormatError("ndarray dtype must be a string".into())
        })?;
        let dtype = DType::from_descriptor(descriptor)?;
        let (chunks, blocks) =
            grid::resolve_geometry(&shape, dtype.itemsize(), Some(&chunks), Some(&blocks))?;

        let grid = ChunkGrid::new(&shape, &chunks);
        let chunk_nbytes = chunks.iter().product::<usize>() * dtype.itemsize();
        if grid.nchunks() != store.nchunks() || store.chunk_nbytes() != chunk_nbytes {
            return Err(TambakError::FrameFormatError(format!(
                "store holds {} chunks of {} bytes, geometry needs {} of {}",
                store.nchunks(),
                store.chunk_nbytes(),
                grid.nchunks(),
                chunk_nbytes
            )));
        }
        Ok(Self {
            shape,
            dtype,
            chunks,
            blocks,
            grid,
            store,
        })
    }

    fn geometry_meta(&self) -> MetaValue {
        let mut map = BTreeMap::new();
        map.insert("shape".to_string(), MetaValue::from_shape(&self.shape));
        map.insert("chunks".to_string(), MetaValue::from_shape(&self.chunks));
        map.insert("blocks".to_string(), MetaValue::from_shape(&self.blocks));
        map.insert("dtype".to_string(), MetaValue::Str(self.dtype.descriptor()));
        MetaValue::Map(map)
    }
}

//==================================================================================
// Accessors
//==================================================================================

impl NDArray {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn chunks(&self) -> &[usize] {
        &self.chunks
    }

    pub fn blocks(&self) -> &[usize] {
        &self.blocks
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn itemsize(&self) -> usize {
        self.dtype.itemsize()
    }

    /// Logical size in bytes (padding excluded).
    pub fn nbytes(&self) -> usize {
        self.size() * self.itemsize()
    }

    /// Stored size of all chunks.
    pub fn cbytes(&self) -> usize {
        self.store.cbytes()
    }

    pub fn nchunks(&self) -> usize {
        self.grid.nchunks()
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub(crate) fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    /// The geometry and codec of this array, for building a sibling.
    pub fn params(&self) -> ArrayParams {
        ArrayParams::default()
            .chunks(&self.chunks)
            .blocks(&self.blocks)
            .codec(self.store.codec().clone())
    }

    /// Field names of a structured dtype (empty otherwise).
    pub fn fields(&self) -> Vec<&str> {
        self.dtype.fields().iter().map(|f| f.name.as_str()).collect()
    }

    pub fn field(self: &Arc<Self>, name: &str) -> Result<FieldView> {
        FieldView::new(Arc::clone(self), name)
    }
}

//==================================================================================
// Region I/O
//==================================================================================

impl NDArray {
    /// Reads a region into a C-contiguous buffer. Only intersecting chunks are
    /// touched, and within each only the blocks covering the selected span.
    pub fn read_region(&self, region: &Region) -> Result<Buffer> {
        let sel = region.resolve(&self.shape)?;
        let data = self.read_selection(&sel)?;
        Buffer::new(sel.shape(), self.dtype.clone(), data)
    }

    pub fn read<T: Element>(&self, region: &Region) -> Result<ArrayD<T>> {
        check_kind::<T>(&self.dtype)?;
        self.read_region(region)?.to_ndarray()
    }

    pub fn to_ndarray<T: Element>(&self) -> Result<ArrayD<T>> {
        self.read(&Region::full())
    }

    /// Reads the unit-step box `bbox`.
    pub(crate) fn read_box(&self, bbox: &[Range<usize>]) -> Result<Vec<u8>> {
        self.read_selection(&Region::from_ranges(bbox).resolve(&self.shape)?)
    }

    pub(crate) fn read_selection(&self, sel: &Selection) -> Result<Vec<u8>> {
        self.read_projected(sel, 0, self.itemsize())
    }

    /// Reads `width` bytes at `offset` from every selected record. The output
    /// holds only those bytes, packed in C order.
    pub(crate) fn read_projected(&self, sel: &Selection, offset: usize, width: usize) -> Result<Vec<u8>> {
        let itemsize = self.itemsize();
        if offset + width > itemsize {
            return Err(TambakError::InvalidParameter(format!(
                "projection {}..{} exceeds the {} byte item",
                offset,
                offset + width,
                itemsize
            )));
        }
        let whole = offset == 0 && width == itemsize;
        let out_shape = sel.shape();
        let mut out = vec![0u8; sel.size() * width];
        if sel.is_empty() {
            return Ok(out);
        }
        let out_strides = grid::strides(&out_shape);
        let layout_strides = grid::strides(&self.chunks);

        for ci in self.grid.intersecting(&sel.bounding_box()) {
            let cbox = self.grid.chunk_box(ci);
            let origin: Vec<usize> = cbox.iter().map(|r| r.start).collect();
            let extent: Vec<usize> = cbox.iter().map(|r| r.len()).collect();
            let Some(hits) = sel.hits(&origin, &extent) else {
                continue;
            };
            let (lo, hi) = span(&hits, &layout_strides);
            let data = self.store.get_range(ci, lo * itemsize, (hi - lo) * itemsize)?;
            grid::for_each_run(&hits, &out_strides, &layout_strides, |o, l, n| {
                let src = (l - lo) * itemsize;
                if whole {
                    out[o * itemsize..(o + n) * itemsize].copy_from_slice(&data[src..src + n * itemsize]);
                    return;
                }
                let records = data[src..src + n * itemsize].chunks_exact(itemsize);
                let slots = out[o * width..(o + n) * width].chunks_exact_mut(width);
                for (slot, record) in slots.zip(records) {
                    slot.copy_from_slice(&record[offset..offset + width]);
                }
            });
        }
        Ok(out)
    }

    /// Writes `value` into a region. `value` holds either the region's
    /// elements in C order or a single element that fills the region. Each
    /// touched chunk is decompressed, patched and recompressed exactly once.
    pub fn write_region(&self, region: &Region, value: &[u8]) -> Result<()> {
        let sel = region.resolve_strict(&self.shape)?;
        let itemsize = self.itemsize();
        let count = sel.size();
        let fill = value.len() == itemsize;
        if value.len() != count * itemsize && !fill {
            return Err(TambakError::ShapeMismatch(format!(
                "value of {} bytes does not match region {:?} of {}",
                value.len(),
                sel.shape(),
                self.dtype
            )));
        }
        if count == 0 {
            return Ok(());
        }
        let out_strides = grid::strides(&sel.shape());
        let layout_strides = grid::strides(&self.chunks);

        let touched = self.grid.intersecting(&sel.bounding_box());
        for &ci in &touched {
            let cbox = self.grid.chunk_box(ci);
            let origin: Vec<usize> = cbox.iter().map(|r| r.start).collect();
            let extent: Vec<usize> = cbox.iter().map(|r| r.len()).collect();
            let Some(hits) = sel.hits(&origin, &extent) else {
                continue;
            };
            let mut raw = self.store.get_chunk(ci)?;
            grid::for_each_run(&hits, &out_strides, &layout_strides, |o, l, n| {
                if fill {
                    for slot in raw[l * itemsize..(l + n) * itemsize].chunks_exact_mut(itemsize) {
                        slot.copy_from_slice(value);
                    }
                } else {
                    raw[l * itemsize..(l + n) * itemsize]
                        .copy_from_slice(&value[o * itemsize..(o + n) * itemsize]);
                }
            });
            self.store.replace(ci, &raw)?;
        }
        log::debug!("wrote {} elements across {} chunks", count, touched.len());
        Ok(())
    }

    /// Typed write. `values` must have the region's shape or a single element.
    pub fn write<T: Element>(&self, region: &Region, values: &ArrayD<T>) -> Result<()> {
        check_kind::<T>(&self.dtype)?;
        let sel_shape = region.resolve_strict(&self.shape)?.shape();
        if values.len() != 1 && values.shape() != sel_shape.as_slice() {
            return Err(TambakError::ShapeMismatch(format!(
                "values of shape {:?} do not match region {:?}",
                values.shape(),
                sel_shape
            )));
        }
        let flat: Vec<T> = values.iter().copied().collect();
        self.write_region(region, &encode_elements(&flat))
    }
}

//==================================================================================
// Persistence
//==================================================================================

impl NDArray {
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        frame::to_frame(&self.store)
    }

    pub fn from_frame(bytes: &[u8]) -> Result<Self> {
        Self::from_store(frame::from_frame(bytes)?)
    }

    pub fn save_sparse(&self, dir: impl AsRef<Path>) -> Result<u64> {
        frame::write_sparse(&self.store, dir)
    }

    pub fn open_sparse(dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_store(frame::open_sparse(dir)?)
    }
}

/// Element range `[lo, hi)` inside the chunk layout covering every hit.
fn span(hits: &[Vec<(usize, usize)>], layout_strides: &[usize]) -> (usize, usize) {
    let mut lo = 0;
    let mut hi = 0;
    for (pairs, &stride) in hits.iter().zip(layout_strides) {
        let (min, max) = pairs
            .iter()
            .fold((usize::MAX, 0), |(mn, mx), &(_, l)| (mn.min(l), mx.max(l)));
        lo += min * stride;
        hi += max * stride;
    }
    (lo, hi + 1)
}
