//! Region selection: per-dimension `start:stop:step` slices, resolved against
//! an array shape into concrete index progressions.

use std::ops::Range;

use crate::error::{Result, TambakError};

/// One dimension of a region request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slice {
    /// A single position. The axis is kept with length 1. Negative values
    /// count from the end; out-of-bounds positions are an error.
    Index(isize),
    /// `start:stop:step` with Python semantics: negative bounds count from the
    /// end, missing bounds mean "from the edge", and reads clip to the shape.
    Range {
        start: Option<isize>,
        stop: Option<isize>,
        step: isize,
    },
}

impl Slice {
    pub fn full() -> Self {
        Slice::Range {
            start: None,
            stop: None,
            step: 1,
        }
    }

    pub fn range(start: isize, stop: isize) -> Self {
        Slice::Range {
            start: Some(start),
            stop: Some(stop),
            step: 1,
        }
    }

    pub fn new(start: Option<isize>, stop: Option<isize>, step: isize) -> Self {
        Slice::Range { start, stop, step }
    }

    /// Resolves against a dimension of length `len`. With `strict`, bounds
    /// outside `-len..=len` fail instead of being clipped.
    fn resolve(&self, len: usize, strict: bool) -> Result<DimSel> {
        let ilen = len as isize;
        match *self {
            Slice::Index(i) => {
                let idx = if i < 0 { i + ilen } else { i };
                if idx < 0 || idx >= ilen {
                    return Err(TambakError::IndexOutOfRange(format!(
                        "index {} out of bounds for axis of length {}",
                        i, len
                    )));
                }
                Ok(DimSel {
                    first: idx as usize,
                    count: 1,
                    step: 1,
                })
            }
            Slice::Range { start, stop, step } => {
                if step == 0 {
                    return Err(TambakError::InvalidParameter("slice step cannot be zero".into()));
                }
                if strict {
                    for bound in [start, stop].into_iter().flatten() {
                        if bound > ilen || bound < -ilen {
                            return Err(TambakError::IndexOutOfRange(format!(
                                "slice bound {} out of bounds for axis of length {}",
                                bound, len
                            )));
                        }
                    }
                }
                let wrap = |v: isize| if v < 0 { v + ilen } else { v };
                let (first, count) = if step > 0 {
                    let lo = start.map_or(0, |v| wrap(v).clamp(0, ilen));
                    let hi = stop.map_or(ilen, |v| wrap(v).clamp(0, ilen));
                    (lo, stride_count(lo, hi, step.unsigned_abs()))
                } else {
                    let hi = start.map_or(ilen - 1, |v| wrap(v).clamp(-1, ilen - 1));
                    let lo = stop.map_or(-1, |v| wrap(v).clamp(-1, ilen - 1));
                    (hi, stride_count(lo, hi, step.unsigned_abs()))
                };
                Ok(DimSel {
                    first: if count == 0 { 0 } else { first as usize },
                    count,
                    step,
                })
            }
        }
    }
}

/// Number of positions visited stepping `step` from one end of `(lo, hi)`
/// toward the other, without forming `hi - lo + step`.
fn stride_count(lo: isize, hi: isize, step: usize) -> usize {
    if hi > lo {
        (hi - lo - 1) as usize / step + 1
    } else {
        0
    }
}

impl From<Range<usize>> for Slice {
    fn from(r: Range<usize>) -> Self {
        Slice::range(r.start as isize, r.end as isize)
    }
}

/// A region request: one [`Slice`] per leading dimension. Missing trailing
/// dimensions select everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    slices: Vec<Slice>,
}

impl Region {
    pub fn new(slices: Vec<Slice>) -> Self {
        Self { slices }
    }

    /// Selects the whole array.
    pub fn full() -> Self {
        Self::default()
    }

    /// Builds a unit-step region from half-open ranges.
    pub fn from_ranges(ranges: &[Range<usize>]) -> Self {
        Self::new(ranges.iter().cloned().map(Slice::from).collect())
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    /// Resolves against `shape`, clipping out-of-bounds range bounds.
    pub fn resolve(&self, shape: &[usize]) -> Result<Selection> {
        self.resolve_with(shape, false)
    }

    /// Resolves against `shape`; out-of-bounds bounds are an error.
    pub fn resolve_strict(&self, shape: &[usize]) -> Result<Selection> {
        self.resolve_with(shape, true)
    }

    fn resolve_with(&self, shape: &[usize], strict: bool) -> Result<Selection> {
        if self.slices.len() > shape.len() {
            return Err(TambakError::IndexOutOfRange(format!(
                "region has {} dimensions but the array has {}",
                self.slices.len(),
                shape.len()
            )));
        }
        let full = Slice::full();
        let dims = shape
            .iter()
            .enumerate()
            .map(|(d, &len)| self.slices.get(d).unwrap_or(&full).resolve(len, strict))
            .collect::<Result<Vec<_>>>()?;
        Ok(Selection { dims })
    }
}

/// A resolved dimension: `count` indices `first, first + step, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimSel {
    pub first: usize,
    pub count: usize,
    pub step: isize,
}

impl DimSel {
    pub fn index(&self, k: usize) -> usize {
        (self.first as isize + k as isize * self.step) as usize
    }

    /// The smallest half-open interval covering every selected index.
    pub fn bounds(&self) -> Range<usize> {
        if self.count == 0 {
            return 0..0;
        }
        let last = self.index(self.count - 1);
        self.first.min(last)..self.first.max(last) + 1
    }
}

/// A resolved region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    dims: Vec<DimSel>,
}

impl Selection {
    pub fn dims(&self) -> &[DimSel] {
        &self.dims
    }

    /// Output shape: the number of selected indices per dimension.
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.count).collect()
    }

    pub fn size(&self) -> usize {
        self.dims.iter().map(|d| d.count).product()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn bounding_box(&self) -> Vec<Range<usize>> {
        self.dims.iter().map(DimSel::bounds).collect()
    }

    /// True if every dimension has unit step.
    pub fn is_box(&self) -> bool {
        self.dims.iter().all(|d| d.step == 1)
    }

    /// For each dimension, the `(output position, local index)` pairs whose
    /// index falls inside `origin[d]..origin[d] + extent[d]`. `None` if some
    /// dimension has no hit.
    pub(crate) fn hits(&self, origin: &[usize], extent: &[usize]) -> Option<Vec<Vec<(usize, usize)>>> {
        let mut out = Vec::with_capacity(self.dims.len());
        for (d, dim) in self.dims.iter().enumerate() {
            let (lo, hi) = (origin[d], origin[d] + extent[d]);
            let pairs: Vec<(usize, usize)> = (0..dim.count)
                .filter_map(|k| {
                    let idx = dim.index(k);
                    (idx >= lo && idx < hi).then(|| (k, idx - lo))
                })
                .collect();
            if pairs.is_empty() {
                return None;
            }
            out.push(pairs);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(sel: &DimSel) -> Vec<usize> {
        (0..sel.count).map(|k| sel.index(k)).collect()
    }

    #[test]
    fn test_slices_follow_python_semantics() {
        let shape = [10];
        let sel = |s: Slice| Region::new(vec![s]).resolve(&shape).unwrap().dims()[0];

        assert_eq!(indices(&sel(Slice::range(1, 10))), (1..10).collect::<Vec<_>>());
        assert_eq!(indices(&sel(Slice::new(None, None, 3))), vec![0, 3, 6, 9]);
        assert_eq!(indices(&sel(Slice::new(Some(-3), None, 1))), vec![7, 8, 9]);
        assert_eq!(indices(&sel(Slice::new(None, None, -4))), vec![9, 5, 1]);
        assert_eq!(indices(&sel(Slice::new(Some(8), Some(2), -2))), vec![8, 6, 4]);
        assert_eq!(sel(Slice::range(5, 100)).count, 5);
        assert_eq!(sel(Slice::range(7, 3)).count, 0);
    }

    #[test]
    fn test_extreme_steps_select_a_single_index() {
        let shape = [10];
        let sel = |s: Slice| Region::new(vec![s]).resolve(&shape).unwrap().dims()[0];

        assert_eq!(indices(&sel(Slice::new(None, None, isize::MAX))), vec![0]);
        assert_eq!(indices(&sel(Slice::new(Some(3), None, isize::MAX))), vec![3]);
        assert_eq!(indices(&sel(Slice::new(None, None, isize::MIN))), vec![9]);
        assert_eq!(indices(&sel(Slice::new(None, None, -isize::MAX))), vec![9]);
        assert_eq!(sel(Slice::new(None, None, isize::MAX)).bounds(), 0..1);
    }

    #[test]
    fn test_bounding_box_and_missing_dims() {
        let region = Region::new(vec![Slice::new(Some(8), Some(2), -3)]);
        let sel = region.resolve(&[10, 4]).unwrap();
        assert_eq!(sel.shape(), vec![2, 4]);
        assert_eq!(sel.bounding_box(), vec![5..9, 0..4]);
        assert!(!sel.is_box());
    }

    #[test]
    fn test_out_of_bounds_requests() {
        assert!(matches!(
            Region::new(vec![Slice::Index(10)]).resolve(&[10]),
            Err(TambakError::IndexOutOfRange(_))
        ));
        assert!(Region::new(vec![Slice::range(0, 11)]).resolve_strict(&[10]).is_err());
        assert!(Region::new(vec![Slice::full(), Slice::full()]).resolve(&[3]).is_err());
        assert!(Region::new(vec![Slice::new(None, None, 0)]).resolve(&[3]).is_err());
    }

    #[test]
    fn test_hits_within_a_chunk() {
        let sel = Region::new(vec![Slice::new(None, None, 2)]).resolve(&[10]).unwrap();
        let hits = sel.hits(&[4], &[4]).unwrap();
        assert_eq!(hits[0], vec![(2, 0), (3, 2)]);
        assert!(sel.hits(&[9], &[1]).is_none());
    }
}
