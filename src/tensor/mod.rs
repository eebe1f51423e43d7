//! Packing of foreign numeric tensors into compressed frames.
//!
//! Anything that can expose its shape, dtype and raw little-endian bytes
//! implements [`Tensor`] and can be packed. Unpacking always yields a
//! [`TensorBuffer`], from which an `ndarray::ArrayD` can be rebuilt.

pub mod pack;

use ndarray::{ArrayD, IxDyn};

use crate::error::{Result, TambakError};
use crate::traits::{decode_elements, encode_elements, Element};
use crate::types::DType;

pub use pack::{
    load_tensor, pack_array, pack_tensor, remove_urlpath, save_tensor, unpack_array,
    unpack_ndarray, unpack_tensor, LEGACY_SIZE_LIMIT,
};

/// Metadata key holding the dtype descriptor of a packed tensor.
pub const DTYPE_META_KEY: &str = "dtype";
/// Metadata key holding the shape of a packed tensor.
pub const SHAPE_META_KEY: &str = "shape";

/// A C-contiguous tensor as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuffer {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub data: Vec<u8>,
}

impl TensorBuffer {
    pub fn new(shape: Vec<usize>, dtype: DType, data: Vec<u8>) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * dtype.itemsize();
        if data.len() != expected {
            return Err(TambakError::ShapeMismatch(format!(
                "tensor of shape {:?} and dtype {} needs {} bytes, got {}",
                shape,
                dtype,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, dtype, data })
    }

    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    pub fn to_ndarray<T: Element>(&self) -> Result<ArrayD<T>> {
        if self.dtype != DType::Scalar(T::KIND) {
            return Err(TambakError::DTypeMismatch(format!(
                "tensor holds {}, requested {}",
                self.dtype,
                T::KIND
            )));
        }
        ArrayD::from_shape_vec(IxDyn(&self.shape), decode_elements(&self.data))
            .map_err(|e| TambakError::ShapeMismatch(e.to_string()))
    }
}

/// Capability shared by every tensor type the packer accepts.
pub trait Tensor {
    fn as_buffer(&self) -> TensorBuffer;
}

impl Tensor for TensorBuffer {
    fn as_buffer(&self) -> TensorBuffer {
        self.clone()
    }
}

impl<T: Element> Tensor for ArrayD<T> {
    fn as_buffer(&self) -> TensorBuffer {
        // `iter` walks logical (C) order whatever the memory layout.
        let values: Vec<T> = self.iter().copied().collect();
        TensorBuffer {
            shape: self.shape().to_vec(),
            dtype: DType::Scalar(T::KIND),
            data: encode_elements(&values),
        }
    }
}

#[cfg(test)]
mod pack_tests;
