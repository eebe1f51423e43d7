//! In-memory operand arrays used while evaluating one chunk of an expression.
//!
//! Integers are carried widened (`i64`/`u64`) and narrowed back to their
//! declared kind after every operation, which gives the wrap-around semantics
//! of the narrow type. Floats keep their native precision.

use ndarray::{ArrayD, IxDyn, Zip};

use crate::error::{Result, TambakError};
use crate::traits::{decode_elements, encode_elements};
use crate::types::ScalarKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Bool(ArrayD<bool>),
    /// Any signed integer kind, widened.
    Int(ArrayD<i64>),
    /// Any unsigned integer kind, widened.
    UInt(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

fn shaped<T>(shape: &[usize], values: Vec<T>) -> Result<ArrayD<T>> {
    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|e| TambakError::ShapeMismatch(e.to_string()))
}

fn widen<T: crate::traits::Element, W>(bytes: &[u8], f: impl Fn(T) -> W) -> Vec<W> {
    decode_elements::<T>(bytes).into_iter().map(f).collect()
}

impl Values {
    /// A zero-filled array in the representation of `kind`.
    pub fn zeros(kind: ScalarKind, shape: &[usize]) -> Values {
        let dim = IxDyn(shape);
        match kind {
            ScalarKind::Bool => Values::Bool(ArrayD::from_elem(dim, false)),
            ScalarKind::Float32 => Values::F32(ArrayD::zeros(dim)),
            ScalarKind::Float64 => Values::F64(ArrayD::zeros(dim)),
            ScalarKind::UInt8 | ScalarKind::UInt16 | ScalarKind::UInt32 | ScalarKind::UInt64 => {
                Values::UInt(ArrayD::zeros(dim))
            }
            _ => Values::Int(ArrayD::zeros(dim)),
        }
    }

    /// Decodes little-endian elements of `kind`.
    pub fn from_bytes(kind: ScalarKind, shape: &[usize], bytes: &[u8]) -> Result<Values> {
        use ScalarKind::*;
        Ok(match kind {
            Bool => Values::Bool(shaped(shape, decode_elements::<bool>(bytes))?),
            Int8 => Values::Int(shaped(shape, widen(bytes, |v: i8| v as i64))?),
            Int16 => Values::Int(shaped(shape, widen(bytes, |v: i16| v as i64))?),
            Int32 => Values::Int(shaped(shape, widen(bytes, |v: i32| v as i64))?),
            Int64 => Values::Int(shaped(shape, decode_elements::<i64>(bytes))?),
            UInt8 => Values::UInt(shaped(shape, widen(bytes, |v: u8| v as u64))?),
            UInt16 => Values::UInt(shaped(shape, widen(bytes, |v: u16| v as u64))?),
            UInt32 => Values::UInt(shaped(shape, widen(bytes, |v: u32| v as u64))?),
            UInt64 => Values::UInt(shaped(shape, decode_elements::<u64>(bytes))?),
            Float32 => Values::F32(shaped(shape, decode_elements::<f32>(bytes))?),
            Float64 => Values::F64(shaped(shape, decode_elements::<f64>(bytes))?),
        })
    }

    /// Encodes as little-endian elements of `kind`, in C order.
    pub fn to_bytes(&self, kind: ScalarKind) -> Vec<u8> {
        use ScalarKind::*;
        let v = self.cast(kind);
        match kind {
            Bool => encode_elements(&v.to_bool().iter().copied().collect::<Vec<_>>()),
            Int8 => encode_elements(&v.to_i64().iter().map(|&x| x as i8).collect::<Vec<_>>()),
            Int16 => encode_elements(&v.to_i64().iter().map(|&x| x as i16).collect::<Vec<_>>()),
            Int32 => encode_elements(&v.to_i64().iter().map(|&x| x as i32).collect::<Vec<_>>()),
            Int64 => encode_elements(&v.to_i64().iter().copied().collect::<Vec<_>>()),
            UInt8 => encode_elements(&v.to_u64().iter().map(|&x| x as u8).collect::<Vec<_>>()),
            UInt16 => encode_elements(&v.to_u64().iter().map(|&x| x as u16).collect::<Vec<_>>()),
            UInt32 => encode_elements(&v.to_u64().iter().map(|&x| x as u32).collect::<Vec<_>>()),
            UInt64 => encode_elements(&v.to_u64().iter().copied().collect::<Vec<_>>()),
            Float32 => encode_elements(&v.to_f32().iter().copied().collect::<Vec<_>>()),
            Float64 => encode_elements(&v.to_f64().iter().copied().collect::<Vec<_>>()),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Values::Bool(a) => a.shape(),
            Values::Int(a) => a.shape(),
            Values::UInt(a) => a.shape(),
            Values::F32(a) => a.shape(),
            Values::F64(a) => a.shape(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if this variant is the representation used for `kind`.
    pub fn holds(&self, kind: ScalarKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&Values::zeros(kind, &[]))
    }

    /// Converts to the representation of `kind`, wrapping integers to its width.
    pub fn cast(&self, kind: ScalarKind) -> Values {
        use ScalarKind::*;
        match kind {
            Bool => Values::Bool(self.to_bool()),
            Float32 => Values::F32(self.to_f32()),
            Float64 => Values::F64(self.to_f64()),
            Int8 | Int16 | Int32 | Int64 => Values::Int(self.to_i64()).wrap(kind),
            UInt8 | UInt16 | UInt32 | UInt64 => Values::UInt(self.to_u64()).wrap(kind),
        }
    }

    /// Narrows widened integers to the range of `kind`.
    pub(crate) fn wrap(self, kind: ScalarKind) -> Values {
        use ScalarKind::*;
        match (self, kind) {
            (Values::Int(a), Int8) => Values::Int(a.mapv(|v| v as i8 as i64)),
            (Values::Int(a), Int16) => Values::Int(a.mapv(|v| v as i16 as i64)),
            (Values::Int(a), Int32) => Values::Int(a.mapv(|v| v as i32 as i64)),
            (Values::UInt(a), UInt8) => Values::UInt(a.mapv(|v| v as u8 as u64)),
            (Values::UInt(a), UInt16) => Values::UInt(a.mapv(|v| v as u16 as u64)),
            (Values::UInt(a), UInt32) => Values::UInt(a.mapv(|v| v as u32 as u64)),
            (other, _) => other,
        }
    }

    /// Materializes a broadcast of this array to `shape`.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Values> {
        fn go<T: Clone>(a: &ArrayD<T>, shape: &[usize]) -> Result<ArrayD<T>> {
            a.broadcast(IxDyn(shape))
                .map(|view| view.to_owned())
                .ok_or_else(|| {
                    TambakError::ShapeMismatch(format!(
                        "cannot broadcast {:?} to {:?}",
                        a.shape(),
                        shape
                    ))
                })
        }
        Ok(match self {
            Values::Bool(a) => Values::Bool(go(a, shape)?),
            Values::Int(a) => Values::Int(go(a, shape)?),
            Values::UInt(a) => Values::UInt(go(a, shape)?),
            Values::F32(a) => Values::F32(go(a, shape)?),
            Values::F64(a) => Values::F64(go(a, shape)?),
        })
    }

    pub fn to_bool(&self) -> ArrayD<bool> {
        match self {
            Values::Bool(a) => a.clone(),
            Values::Int(a) => a.mapv(|v| v != 0),
            Values::UInt(a) => a.mapv(|v| v != 0),
            Values::F32(a) => a.mapv(|v| v != 0.0),
            Values::F64(a) => a.mapv(|v| v != 0.0),
        }
    }

    pub fn to_i64(&self) -> ArrayD<i64> {
        match self {
            Values::Bool(a) => a.mapv(i64::from),
            Values::Int(a) => a.clone(),
            Values::UInt(a) => a.mapv(|v| v as i64),
            Values::F32(a) => a.mapv(|v| v as i64),
            Values::F64(a) => a.mapv(|v| v as i64),
        }
    }

    pub fn to_u64(&self) -> ArrayD<u64> {
        match self {
            Values::Bool(a) => a.mapv(u64::from),
            Values::Int(a) => a.mapv(|v| v as u64),
            Values::UInt(a) => a.clone(),
            Values::F32(a) => a.mapv(|v| v as u64),
            Values::F64(a) => a.mapv(|v| v as u64),
        }
    }

    pub fn to_f32(&self) -> ArrayD<f32> {
        match self {
            Values::Bool(a) => a.mapv(|v| if v { 1.0 } else { 0.0 }),
            Values::Int(a) => a.mapv(|v| v as f32),
            Values::UInt(a) => a.mapv(|v| v as f32),
            Values::F32(a) => a.clone(),
            Values::F64(a) => a.mapv(|v| v as f32),
        }
    }

    pub fn to_f64(&self) -> ArrayD<f64> {
        match self {
            Values::Bool(a) => a.mapv(|v| if v { 1.0 } else { 0.0 }),
            Values::Int(a) => a.mapv(|v| v as f64),
            Values::UInt(a) => a.mapv(|v| v as f64),
            Values::F32(a) => a.mapv(f64::from),
            Values::F64(a) => a.clone(),
        }
    }
}

/// Combines two arrays elementwise under NumPy broadcasting.
pub(crate) fn zip_with<A: Copy, B: Copy, C>(
    a: &ArrayD<A>,
    b: &ArrayD<B>,
    f: impl Fn(A, B) -> C,
) -> Result<ArrayD<C>> {
    let shape = crate::expr::node::broadcast_shapes(a.shape(), b.shape())?;
    let dim = IxDyn(&shape);
    let mismatch = || {
        TambakError::ShapeMismatch(format!(
            "operands {:?} and {:?} do not broadcast",
            a.shape(),
            b.shape()
        ))
    };
    let av = a.broadcast(dim.clone()).ok_or_else(mismatch)?;
    let bv = b.broadcast(dim).ok_or_else(mismatch)?;
    Ok(Zip::from(av).and(bv).map_collect(|&x, &y| f(x, y)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_kinds_wrap_on_cast() {
        let wide = Values::Int(ArrayD::from_shape_vec(IxDyn(&[3]), vec![127, 128, -129]).unwrap());
        let narrow = wide.cast(ScalarKind::Int8);
        assert_eq!(narrow.to_i64().into_raw_vec_and_offset().0, vec![127, -128, 127]);
        assert_eq!(wide.to_bytes(ScalarKind::Int8), vec![127, 0x80, 127]);
    }

    #[test]
    fn test_bytes_roundtrip_per_kind() {
        let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let values = Values::from_bytes(ScalarKind::Float32, &[2], &bytes).unwrap();
        assert!(values.holds(ScalarKind::Float32));
        assert_eq!(values.to_bytes(ScalarKind::Float32), bytes);
        assert!(Values::from_bytes(ScalarKind::Float32, &[3], &bytes).is_err());
    }

    #[test]
    fn test_zip_with_broadcasts_trailing_dims() {
        let col = ArrayD::from_shape_vec(IxDyn(&[3, 1]), vec![0i64, 10, 20]).unwrap();
        let row = ArrayD::from_shape_vec(IxDyn(&[4]), vec![1i64, 2, 3, 4]).unwrap();
        let sum = zip_with(&col, &row, |a, b| a + b).unwrap();
        assert_eq!(sum.shape(), &[3, 4]);
        assert_eq!(sum[&[2, 3][..]], 24);
        let bad = ArrayD::from_shape_vec(IxDyn(&[2]), vec![1i64, 2]).unwrap();
        assert!(zip_with(&row, &bad, |a, b| a + b).is_err());
    }
}
