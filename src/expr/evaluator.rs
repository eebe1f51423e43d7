//! Chunk-parallel evaluation of a `LazyExpr`.
//!
//! The output domain is cut into the output array's chunk grid and every
//! chunk becomes one task on a dedicated rayon pool. A task evaluates the
//! tree over its chunk box, compresses the result, and places it into a slot
//! reserved up front, so chunks may finish in any order. The first failing
//! task aborts the whole evaluation.

use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use crate::array::grid::{self, ChunkGrid};
use crate::array::{Buffer, NDArray, Region};
use crate::config::{CodecConfig, EvalConfig};
use crate::error::{Result, TambakError};
use crate::expr::compute::eval_node;
use crate::expr::node::ExprNode;
use crate::expr::ops::LazyExpr;
use crate::store::Chunk;
use crate::types::DType;

pub struct Evaluator {
    config: EvalConfig,
    pool: rayon::ThreadPool,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Result<Self> {
        let nthreads = match config.nthreads {
            Some(0) => {
                return Err(TambakError::InvalidParameter(
                    "nthreads must be at least 1".into(),
                ))
            }
            Some(n) => n,
            None => std::thread::available_parallelism().map_or(1, |n| n.get()),
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .thread_name(|i| format!("tambak-eval-{}", i))
            .build()
            .map_err(|e| TambakError::InternalError(format!("failed to build worker pool: {}", e)))?;
        Ok(Self { config, pool })
    }

    pub fn nthreads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Materializes `expr` into a new compressed array.
    pub fn evaluate(&self, expr: &LazyExpr) -> Result<NDArray> {
        let root = expr.node()?;
        let start = Instant::now();
        let inputs = root.arrays();
        let revisions: Vec<u64> = inputs.iter().map(|a| a.store().revision()).collect();

        let (chunks, blocks, codec) = self.output_geometry(root)?;
        let out = NDArray::allocate(
            root.shape(),
            DType::Scalar(root.dtype()),
            chunks,
            blocks,
            &codec,
        )?;
        let out_grid = out.grid().clone();
        let nchunks = out_grid.nchunks();
        let first = out.store().reserve(nchunks);
        let itemsize = out.itemsize();
        let layout = out.chunks().to_vec();

        self.pool.install(|| {
            (0..nchunks).into_par_iter().try_for_each(|ci| {
                let cbox = out_grid.chunk_box(ci);
                let raw = eval_box(root, &cbox)?;
                let extent: Vec<usize> = cbox.iter().map(|r| r.len()).collect();
                let padded = grid::pad_to_layout(&raw, &extent, &layout, itemsize);
                let chunk = Chunk::compress(&padded, out.store().codec())
                    .map_err(|e| e.at_chunk(ci))?;
                out.store().insert_compressed(first + ci, chunk)
            })
        })?;

        check_inputs(&inputs, &revisions)?;
        log_metric!(
            "event" = "evaluate",
            "shape" = &format!("{:?}", out.shape()),
            "dtype" = &out.dtype().to_string(),
            "nchunks" = &nchunks,
            "nthreads" = &self.nthreads(),
            "cbytes" = &out.cbytes(),
            "elapsed_us" = &start.elapsed().as_micros()
        );
        Ok(out)
    }

    /// Evaluates only the elements of `region`, returning them uncompressed.
    /// Chunks of the output grid that the region does not touch are skipped.
    pub fn evaluate_slice(&self, expr: &LazyExpr, region: &Region) -> Result<Buffer> {
        let root = expr.node()?;
        let inputs = root.arrays();
        let revisions: Vec<u64> = inputs.iter().map(|a| a.store().revision()).collect();

        let sel = region.resolve(root.shape())?;
        let dtype = DType::Scalar(root.dtype());
        let itemsize = dtype.itemsize();
        let out_shape = sel.shape();
        let mut data = vec![0u8; sel.size() * itemsize];
        if sel.is_empty() {
            return Buffer::new(out_shape, dtype, data);
        }

        let (chunks, _, _) = self.output_geometry(root)?;
        let out_grid = ChunkGrid::new(root.shape(), &chunks);
        let bbox = sel.bounding_box();
        let pieces = self.pool.install(|| {
            out_grid
                .intersecting(&bbox)
                .into_par_iter()
                .map(|ci| {
                    let sub: Vec<Range<usize>> = out_grid
                        .chunk_box(ci)
                        .iter()
                        .zip(&bbox)
                        .map(|(c, b)| c.start.max(b.start)..c.end.min(b.end))
                        .collect();
                    let raw = eval_box(root, &sub)?;
                    Ok((sub, raw))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let out_strides = grid::strides(&out_shape);
        for (sub, raw) in pieces {
            let origin: Vec<usize> = sub.iter().map(|r| r.start).collect();
            let extent: Vec<usize> = sub.iter().map(|r| r.len()).collect();
            let Some(hits) = sel.hits(&origin, &extent) else {
                continue;
            };
            let local_strides = grid::strides(&extent);
            grid::for_each_run(&hits, &out_strides, &local_strides, |o, l, n| {
                data[o * itemsize..(o + n) * itemsize]
                    .copy_from_slice(&raw[l * itemsize..(l + n) * itemsize]);
            });
        }

        check_inputs(&inputs, &revisions)?;
        Buffer::new(out_shape, dtype, data)
    }

    /// Chunks, blocks and codec of the output array: the configured values
    /// first, then the first array operand's, then the defaults.
    fn output_geometry(&self, root: &ExprNode) -> Result<(Vec<usize>, Vec<usize>, CodecConfig)> {
        let shape = root.shape();
        let itemsize = root.dtype().itemsize();
        let first = root.arrays().into_iter().next();
        let inherited = first.as_ref().filter(|a| a.ndim() == shape.len());

        let chunks = self
            .config
            .chunks
            .clone()
            .or_else(|| inherited.map(|a| a.chunks().to_vec()));
        let blocks = self.config.blocks.clone().or_else(|| {
            if self.config.chunks.is_none() {
                inherited.map(|a| a.blocks().to_vec())
            } else {
                None
            }
        });
        let (chunks, blocks) =
            grid::resolve_geometry(shape, itemsize, chunks.as_deref(), blocks.as_deref())?;

        let codec = match (&self.config.codec, &first) {
            (Some(codec), _) => codec.clone(),
            (None, Some(array)) => array.params().codec,
            (None, None) => CodecConfig::default(),
        };
        Ok((chunks, blocks, codec))
    }
}

/// Evaluates the tree over `bbox` and lays the result out as C-order bytes
/// of the root dtype.
fn eval_box(root: &ExprNode, bbox: &[Range<usize>]) -> Result<Vec<u8>> {
    let extent: Vec<usize> = bbox.iter().map(|r| r.len()).collect();
    let values = eval_node(root, bbox)?.broadcast_to(&extent)?;
    Ok(values.to_bytes(root.dtype()))
}

fn check_inputs(inputs: &[Arc<NDArray>], revisions: &[u64]) -> Result<()> {
    inputs
        .iter()
        .zip(revisions)
        .try_for_each(|(array, &rev)| array.store().check_revision(rev))
}
