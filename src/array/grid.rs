//! Chunk-grid arithmetic and the byte copy loops shared by region reads,
//! region writes and the evaluator.

use std::ops::Range;

use crate::error::{Result, TambakError};

/// Target uncompressed chunk size when no chunk shape is given.
pub const DEFAULT_CHUNK_NBYTES: usize = 1 << 20;
/// Target block size when no block shape is given.
pub const DEFAULT_BLOCK_NBYTES: usize = 1 << 16;

/// C-order element strides of `shape`.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut out = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        out[d] = out[d + 1] * shape[d + 1];
    }
    out
}

/// Shrinks `shape` by halving its largest dimension until one tile fits `target` bytes.
pub fn default_tile(shape: &[usize], itemsize: usize, target: usize) -> Vec<usize> {
    let mut tile: Vec<usize> = shape.iter().map(|&d| d.max(1)).collect();
    while tile.iter().product::<usize>() * itemsize > target {
        let Some((d, _)) = tile
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 1)
            .max_by_key(|(_, v)| **v)
        else {
            break;
        };
        tile[d] = tile[d].div_ceil(2);
    }
    tile
}

/// Validates user chunk/block shapes, deriving the missing ones.
pub fn resolve_geometry(
    shape: &[usize],
    itemsize: usize,
    chunks: Option<&[usize]>,
    blocks: Option<&[usize]>,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let chunks = match chunks {
        Some(c) => c.to_vec(),
        None => default_tile(shape, itemsize, DEFAULT_CHUNK_NBYTES),
    };
    if chunks.len() != shape.len() {
        return Err(TambakError::ShapeMismatch(format!(
            "chunk shape {:?} does not match array rank {}",
            chunks,
            shape.len()
        )));
    }
    if chunks.iter().any(|&c| c == 0) {
        return Err(TambakError::InvalidParameter(format!(
            "chunk shape {:?} has a zero dimension",
            chunks
        )));
    }
    let blocks = match blocks {
        Some(b) => b.to_vec(),
        None => default_tile(&chunks, itemsize, DEFAULT_BLOCK_NBYTES),
    };
    if blocks.len() != chunks.len()
        || blocks.iter().zip(&chunks).any(|(&b, &c)| b == 0 || b > c)
    {
        return Err(TambakError::InvalidParameter(format!(
            "block shape {:?} must satisfy 1 <= block <= chunk {:?}",
            blocks, chunks
        )));
    }
    Ok((chunks, blocks))
}

/// The regular grid of chunks covering an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    shape: Vec<usize>,
    chunks: Vec<usize>,
    counts: Vec<usize>,
}

impl ChunkGrid {
    pub fn new(shape: &[usize], chunks: &[usize]) -> Self {
        let counts = shape
            .iter()
            .zip(chunks)
            .map(|(&s, &c)| s.div_ceil(c))
            .collect();
        Self {
            shape: shape.to_vec(),
            chunks: chunks.to_vec(),
            counts,
        }
    }

    pub fn chunk_shape(&self) -> &[usize] {
        &self.chunks
    }

    pub fn nchunks(&self) -> usize {
        self.counts.iter().product()
    }

    /// Grid coordinates of chunk `index` (C order).
    pub fn coords(&self, mut index: usize) -> Vec<usize> {
        let mut coords = vec![0; self.counts.len()];
        for d in (0..self.counts.len()).rev() {
            coords[d] = index % self.counts[d];
            index /= self.counts[d];
        }
        coords
    }

    pub fn index(&self, coords: &[usize]) -> usize {
        coords
            .iter()
            .zip(&self.counts)
            .fold(0, |acc, (&c, &n)| acc * n + c)
    }

    /// The logical element box covered by chunk `index`, clipped to the array.
    pub fn chunk_box(&self, index: usize) -> Vec<Range<usize>> {
        self.coords(index)
            .iter()
            .enumerate()
            .map(|(d, &c)| {
                let start = c * self.chunks[d];
                start..(start + self.chunks[d]).min(self.shape[d])
            })
            .collect()
    }

    /// Indices of every chunk overlapping `bbox`, in C order.
    pub fn intersecting(&self, bbox: &[Range<usize>]) -> Vec<usize> {
        if bbox.iter().any(|r| r.is_empty()) || self.nchunks() == 0 {
            return Vec::new();
        }
        let ranges: Vec<Range<usize>> = bbox
            .iter()
            .zip(&self.chunks)
            .map(|(r, &c)| r.start / c..(r.end - 1) / c + 1)
            .collect();
        let mut out = Vec::new();
        for_each_coord(&ranges, |coords| out.push(self.index(coords)));
        out
    }
}

/// Calls `f` with every coordinate inside the box, in C order.
pub fn for_each_coord(ranges: &[Range<usize>], mut f: impl FnMut(&[usize])) {
    if ranges.iter().any(|r| r.is_empty()) {
        return;
    }
    let mut coords: Vec<usize> = ranges.iter().map(|r| r.start).collect();
    loop {
        f(&coords);
        let mut d = ranges.len();
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            coords[d] += 1;
            if coords[d] < ranges[d].end {
                break;
            }
            coords[d] = ranges[d].start;
        }
    }
}

/// Walks the cartesian product of per-dimension `(output, local)` index pairs
/// and calls `f(output_elem, local_elem, run)` for every run of elements that
/// is contiguous on both sides.
pub(crate) fn for_each_run(
    hits: &[Vec<(usize, usize)>],
    out_strides: &[usize],
    local_strides: &[usize],
    mut f: impl FnMut(usize, usize, usize),
) {
    let ndim = hits.len();
    if ndim == 0 {
        f(0, 0, 1);
        return;
    }
    // Group the innermost dimension into runs.
    let mut runs: Vec<(usize, usize, usize)> = Vec::new();
    for &(o, l) in &hits[ndim - 1] {
        match runs.last_mut() {
            Some((ro, rl, len)) if *ro + *len == o && *rl + *len == l => *len += 1,
            _ => runs.push((o, l, 1)),
        }
    }
    let outer: Vec<Range<usize>> = hits[..ndim - 1].iter().map(|h| 0..h.len()).collect();
    let (os, ls) = (out_strides[ndim - 1], local_strides[ndim - 1]);
    let mut visit = |ks: &[usize]| {
        let (mut obase, mut lbase) = (0, 0);
        for (d, &k) in ks.iter().enumerate() {
            let (o, l) = hits[d][k];
            obase += o * out_strides[d];
            lbase += l * local_strides[d];
        }
        for &(o, l, len) in &runs {
            if os == 1 && ls == 1 {
                f(obase + o, lbase + l, len);
            } else {
                for i in 0..len {
                    f(obase + (o + i) * os, lbase + (l + i) * ls, 1);
                }
            }
        }
    };
    if outer.is_empty() {
        visit(&[]);
    } else {
        for_each_coord(&outer, visit);
    }
}

/// Copies the valid `extent` of a C-contiguous `src` into a zero-padded buffer
/// laid out with `layout` (the full chunk shape).
pub(crate) fn pad_to_layout(src: &[u8], extent: &[usize], layout: &[usize], itemsize: usize) -> Vec<u8> {
    let total: usize = layout.iter().product::<usize>() * itemsize;
    if extent == layout {
        return src.to_vec();
    }
    let mut out = vec![0u8; total];
    let hits: Vec<Vec<(usize, usize)>> = extent.iter().map(|&n| (0..n).map(|i| (i, i)).collect()).collect();
    if hits.iter().any(|h| h.is_empty()) {
        return out;
    }
    let (src_strides, dst_strides) = (strides(extent), strides(layout));
    for_each_run(&hits, &src_strides, &dst_strides, |s, d, len| {
        out[d * itemsize..(d + len) * itemsize].copy_from_slice(&src[s * itemsize..(s + len) * itemsize]);
    });
    out
}

/// Copies the elements inside `bbox` out of a C-contiguous array of `shape`.
pub(crate) fn extract_box(src: &[u8], shape: &[usize], bbox: &[Range<usize>], itemsize: usize) -> Vec<u8> {
    let box_shape: Vec<usize> = bbox.iter().map(|r| r.len()).collect();
    let mut out = vec![0u8; box_shape.iter().product::<usize>() * itemsize];
    let hits: Vec<Vec<(usize, usize)>> = bbox
        .iter()
        .map(|r| r.clone().enumerate().collect())
        .collect();
    if hits.iter().any(|h| h.is_empty()) {
        return out;
    }
    for_each_run(&hits, &strides(&box_shape), &strides(shape), |o, l, n| {
        out[o * itemsize..(o + n) * itemsize].copy_from_slice(&src[l * itemsize..(l + n) * itemsize]);
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_coordinates() {
        let grid = ChunkGrid::new(&[10, 7], &[4, 3]);
        assert_eq!(grid.nchunks(), 9);
        assert_eq!(grid.coords(5), vec![1, 2]);
        assert_eq!(grid.index(&[1, 2]), 5);
        assert_eq!(grid.chunk_box(8), vec![8..10, 6..7]);
        assert_eq!(grid.intersecting(&[3..5, 0..2]), vec![0, 3]);
        assert!(grid.intersecting(&[3..3, 0..2]).is_empty());
    }

    #[test]
    fn test_default_geometry() {
        let (chunks, blocks) = resolve_geometry(&[1000, 1000], 8, None, None).unwrap();
        assert!(chunks.iter().product::<usize>() * 8 <= DEFAULT_CHUNK_NBYTES);
        assert!(blocks.iter().zip(&chunks).all(|(b, c)| b <= c));
        assert!(resolve_geometry(&[10], 8, Some(&[4]), Some(&[5])).is_err());
        assert!(resolve_geometry(&[10], 8, Some(&[4, 4]), None).is_err());
    }

    #[test]
    fn test_padding_edge_chunk() {
        let src: Vec<u8> = (1..=6).collect();
        let padded = pad_to_layout(&src, &[2, 3], &[3, 4], 1);
        assert_eq!(padded, vec![1, 2, 3, 0, 4, 5, 6, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_runs_merge_contiguous_elements() {
        let hits = vec![vec![(0, 1), (1, 2)], vec![(0, 0), (1, 1), (2, 2)]];
        let mut calls = Vec::new();
        for_each_run(&hits, &[3, 1], &[4, 1], |o, l, n| calls.push((o, l, n)));
        assert_eq!(calls, vec![(0, 4, 3), (3, 8, 3)]);
    }
}
