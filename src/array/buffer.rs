use ndarray::{ArrayD, IxDyn};

use crate::error::{Result, TambakError};
use crate::traits::{decode_elements, Element};
use crate::types::DType;

/// An uncompressed, C-contiguous result of a region read or slice evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub data: Vec<u8>,
}

impl Buffer {
    pub fn new(shape: Vec<usize>, dtype: DType, data: Vec<u8>) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * dtype.itemsize();
        if data.len() != expected {
            return Err(TambakError::ShapeMismatch(format!(
                "buffer of {} bytes does not hold shape {:?} of {}",
                data.len(),
                shape,
                dtype
            )));
        }
        Ok(Self { shape, dtype, data })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        check_kind::<T>(&self.dtype)?;
        Ok(decode_elements(&self.data))
    }

    pub fn to_ndarray<T: Element>(&self) -> Result<ArrayD<T>> {
        let values = self.to_vec::<T>()?;
        ArrayD::from_shape_vec(IxDyn(&self.shape), values)
            .map_err(|e| TambakError::ShapeMismatch(e.to_string()))
    }
}

/// Fails with `DTypeMismatch` unless `dtype` is exactly `T`'s scalar kind.
pub(crate) fn check_kind<T: Element>(dtype: &DType) -> Result<()> {
    if dtype.scalar_kind() != Some(T::KIND) {
        return Err(TambakError::DTypeMismatch(format!(
            "requested {} but the data is {}",
            T::KIND,
            dtype
        )));
    }
    Ok(())
}
