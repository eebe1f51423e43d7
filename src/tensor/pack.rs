//! Tensor <-> frame conversion and the file/directory helpers around it.

use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::config::{CodecConfig, PackParams};
use crate::error::{Result, TambakError};
use crate::frame;
use crate::store::{Chunk, ChunkStore, MetaValue};
use crate::tensor::{Tensor, TensorBuffer, DTYPE_META_KEY, SHAPE_META_KEY};
use crate::traits::Element;
use crate::types::DType;

/// Largest buffer the single-blob path accepts (just under 2 GiB).
pub const LEGACY_SIZE_LIMIT: usize = i32::MAX as usize;

//==================================================================================
// I. Frame packing
//==================================================================================

/// Packs `tensor` into a contiguous frame, cut into chunks of about
/// `params.chunk_nbytes` bytes.
pub fn pack_tensor(tensor: &impl Tensor, params: &PackParams) -> Result<Vec<u8>> {
    let store = pack_store(&tensor.as_buffer(), &params.codec, params.chunk_nbytes)?;
    frame::to_frame(&store)
}

pub fn unpack_tensor(bytes: &[u8]) -> Result<TensorBuffer> {
    unpack_store(&frame::from_frame(bytes)?)
}

/// Unpacks a frame straight into an `ndarray` of element type `T`.
pub fn unpack_ndarray<T: Element>(bytes: &[u8]) -> Result<ndarray::ArrayD<T>> {
    unpack_tensor(bytes)?.to_ndarray()
}

/// Legacy single-blob packing: the whole buffer is one chunk.
pub fn pack_array(tensor: &impl Tensor, codec: &CodecConfig) -> Result<Vec<u8>> {
    let buffer = tensor.as_buffer();
    check_legacy_size(buffer.nbytes())?;
    let store = pack_store(&buffer, codec, buffer.nbytes().max(1))?;
    frame::to_frame(&store)
}

pub fn unpack_array(bytes: &[u8]) -> Result<TensorBuffer> {
    let store = frame::from_frame(bytes)?;
    if store.nchunks() > 1 {
        return Err(TambakError::FrameFormatError(format!(
            "single-blob frame holds {} chunks",
            store.nchunks()
        )));
    }
    unpack_store(&store)
}

fn check_legacy_size(size: usize) -> Result<()> {
    if size > LEGACY_SIZE_LIMIT {
        return Err(TambakError::SizeLimitExceeded {
            size,
            limit: LEGACY_SIZE_LIMIT,
        });
    }
    Ok(())
}

/// Chunk size in bytes: the target rounded down to whole items, at least one.
fn chunk_size(target: usize, itemsize: usize) -> usize {
    (target / itemsize).max(1) * itemsize
}

fn pack_store(buffer: &TensorBuffer, codec: &CodecConfig, target: usize) -> Result<ChunkStore> {
    let start = Instant::now();
    let itemsize = buffer.dtype.itemsize();
    if itemsize == 0 {
        return Err(TambakError::InvalidParameter(format!(
            "dtype {} has zero item size",
            buffer.dtype
        )));
    }
    let codec = codec.with_typesize(if itemsize <= 255 { itemsize } else { 1 });
    let chunk_nbytes = chunk_size(target, itemsize);
    let store = ChunkStore::new(codec, chunk_nbytes)?;
    {
        let mut meta = store.metadata_mut();
        meta.set(DTYPE_META_KEY, buffer.dtype.descriptor())?;
        meta.set(SHAPE_META_KEY, MetaValue::from_shape(&buffer.shape))?;
    }

    let chunks = buffer
        .data
        .par_chunks(chunk_nbytes)
        .enumerate()
        .map(|(i, raw)| Chunk::compress(raw, store.codec()).map_err(|e| e.at_chunk(i)))
        .collect::<Result<Vec<_>>>()?;
    for chunk in chunks {
        store.append_compressed(chunk)?;
    }

    log_metric!(
        "event" = "pack_tensor",
        "dtype" = &buffer.dtype.descriptor(),
        "nbytes" = &store.nbytes(),
        "cbytes" = &store.cbytes(),
        "nchunks" = &store.nchunks(),
        "elapsed_us" = &start.elapsed().as_micros()
    );
    Ok(store)
}

fn unpack_store(store: &ChunkStore) -> Result<TensorBuffer> {
    let (dtype, shape) = {
        let meta = store.metadata();
        let dtype = meta.get(DTYPE_META_KEY)?;
        let descriptor = dtype.as_str().ok_or_else(|| {
            TambakError::FrameFormatError("tensor dtype must be a string".into())
        })?;
        (
            DType::from_descriptor(descriptor)?,
            meta.get(SHAPE_META_KEY)?.to_shape()?,
        )
    };
    let data = store.read_bytes(0, store.nbytes())?;
    TensorBuffer::new(shape, dtype, data).map_err(|e| {
        TambakError::FrameFormatError(format!("stored tensor is inconsistent: {}", e))
    })
}

//==================================================================================
// II. Files and directories
//==================================================================================

/// Writes `tensor` to `path`, replacing whatever was there: a single file
/// when `params.contiguous`, a sparse directory otherwise. Returns the
/// number of bytes written.
///
/// The tensor is packed in memory before anything at `path` is removed, so
/// a failed pack leaves the previous contents in place.
pub fn save_tensor(tensor: &impl Tensor, path: impl AsRef<Path>, params: &PackParams) -> Result<u64> {
    let path = path.as_ref();
    let store = pack_store(&tensor.as_buffer(), &params.codec, params.chunk_nbytes)?;
    let written = if params.contiguous {
        let bytes = frame::to_frame(&store)?;
        remove_urlpath(path)?;
        fs::write(path, &bytes)?;
        bytes.len() as u64
    } else {
        remove_urlpath(path)?;
        frame::write_sparse(&store, path)?
    };
    log::info!("saved tensor to {} ({} bytes)", path.display(), written);
    Ok(written)
}

/// Reads a tensor saved by [`save_tensor`]. The layout is detected from
/// whether `path` is a directory.
pub fn load_tensor(path: impl AsRef<Path>) -> Result<TensorBuffer> {
    let path = path.as_ref();
    if path.is_dir() {
        unpack_store(&frame::open_sparse(path)?)
    } else {
        unpack_tensor(&fs::read(path)?)
    }
}

/// Deletes a file or directory tree. A missing path is not an error.
pub fn remove_urlpath(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
