//! Elementwise kernels and the recursive evaluation of one sub-region.

use ndarray::{ArrayD, IxDyn};
use num_traits::Float;
use std::ops::Range;

use crate::error::{Result, TambakError};
use crate::expr::node::{BinaryOp, CompareOp, ExprNode, Leaf, NodeKind, Scalar, UnaryOp};
use crate::expr::values::{zip_with, Values};
use crate::types::ScalarKind;

/// Evaluates `node` over `bbox`, a box in the root expression's domain.
/// Leaves read only their broadcast-mapped part of that box.
pub(crate) fn eval_node(node: &ExprNode, bbox: &[Range<usize>]) -> Result<Values> {
    match node.kind() {
        NodeKind::Leaf(Leaf::Array(array)) => {
            let lbox = local_box(array.shape(), bbox);
            let bytes = array.read_box(&lbox)?;
            Values::from_bytes(node.dtype(), &lens(&lbox), &bytes)
        }
        NodeKind::Leaf(Leaf::Field(field)) => {
            let lbox = local_box(field.shape(), bbox);
            let bytes = field.read_box(&lbox)?;
            Values::from_bytes(node.dtype(), &lens(&lbox), &bytes)
        }
        NodeKind::Leaf(Leaf::Scalar(value)) => Ok(scalar_values(*value)),
        NodeKind::Unary { op, operand } => apply_unary(*op, node.dtype(), eval_node(operand, bbox)?),
        NodeKind::Binary {
            op,
            lhs,
            rhs,
            operand,
        } => apply_binary(*op, *operand, &eval_node(lhs, bbox)?, &eval_node(rhs, bbox)?),
        NodeKind::Compare {
            op,
            lhs,
            rhs,
            operand,
        } => apply_compare(*op, *operand, &eval_node(lhs, bbox)?, &eval_node(rhs, bbox)?),
        NodeKind::Udf { udf, inputs } => {
            let lbox = local_box(node.shape(), bbox);
            let shape = lens(&lbox);
            let offset: Vec<usize> = lbox.iter().map(|r| r.start).collect();
            let args = inputs
                .iter()
                .map(|input| eval_node(input, bbox)?.broadcast_to(&shape))
                .collect::<Result<Vec<_>>>()?;
            udf.call(&args, &shape, &offset)
        }
    }
}

/// Maps a box of the root domain onto an operand of `shape` (trailing
/// alignment; size-1 dimensions map to `0..1`).
fn local_box(shape: &[usize], bbox: &[Range<usize>]) -> Vec<Range<usize>> {
    let skip = bbox.len() - shape.len();
    shape
        .iter()
        .enumerate()
        .map(|(j, &n)| if n == 1 { 0..1 } else { bbox[skip + j].clone() })
        .collect()
}

fn lens(bbox: &[Range<usize>]) -> Vec<usize> {
    bbox.iter().map(|r| r.len()).collect()
}

fn scalar_values(value: Scalar) -> Values {
    let dim = IxDyn(&[]);
    match value {
        Scalar::Bool(v) => Values::Bool(ArrayD::from_elem(dim, v)),
        Scalar::Int(v) => Values::Int(ArrayD::from_elem(dim, v)),
        Scalar::Float(v) => Values::F64(ArrayD::from_elem(dim, v)),
    }
}

fn unsupported(what: impl std::fmt::Debug, kind: ScalarKind) -> TambakError {
    TambakError::InternalError(format!("{:?} reached the kernels with {}", what, kind))
}

//==================================================================================
// Unary
//==================================================================================

fn apply_unary(op: UnaryOp, kind: ScalarKind, input: Values) -> Result<Values> {
    use UnaryOp::*;
    let out = match (op, input) {
        (Neg, Values::Int(a)) => Values::Int(a.mapv(i64::wrapping_neg)),
        (Neg, Values::UInt(a)) => Values::UInt(a.mapv(u64::wrapping_neg)),
        (Neg, Values::F32(a)) => Values::F32(a.mapv(|v| -v)),
        (Neg, Values::F64(a)) => Values::F64(a.mapv(|v| -v)),
        (Not, Values::Bool(a)) => Values::Bool(a.mapv(|v| !v)),
        (Not, Values::Int(a)) => Values::Int(a.mapv(|v| !v)),
        (Not, Values::UInt(a)) => Values::UInt(a.mapv(|v| !v)),
        (Abs, Values::Int(a)) => Values::Int(a.mapv(i64::wrapping_abs)),
        (Abs, Values::F32(a)) => Values::F32(a.mapv(f32::abs)),
        (Abs, Values::F64(a)) => Values::F64(a.mapv(f64::abs)),
        (Abs, other) => other,
        (Sqrt | Exp | Log | Sin | Cos, input) => match input.cast(kind) {
            Values::F32(a) => Values::F32(a.mapv(float_unary::<f32>(op))),
            Values::F64(a) => Values::F64(a.mapv(float_unary::<f64>(op))),
            _ => return Err(unsupported(op, kind)),
        },
        _ => return Err(unsupported(op, kind)),
    };
    Ok(out.wrap(kind))
}

fn float_unary<F: Float>(op: UnaryOp) -> fn(F) -> F {
    match op {
        UnaryOp::Sqrt => F::sqrt,
        UnaryOp::Exp => F::exp,
        UnaryOp::Log => F::ln,
        UnaryOp::Sin => F::sin,
        UnaryOp::Cos => F::cos,
        UnaryOp::Abs => F::abs,
        UnaryOp::Neg | UnaryOp::Not => |v: F| -v,
    }
}

//==================================================================================
// Binary
//==================================================================================

fn apply_binary(op: BinaryOp, operand: ScalarKind, lhs: &Values, rhs: &Values) -> Result<Values> {
    let out = match (lhs.cast(operand), rhs.cast(operand)) {
        (Values::Int(a), Values::Int(b)) => {
            let f = int_kernel(op).ok_or_else(|| unsupported(op, operand))?;
            Values::Int(zip_with(&a, &b, f)?)
        }
        (Values::UInt(a), Values::UInt(b)) => {
            let f = uint_kernel(op).ok_or_else(|| unsupported(op, operand))?;
            Values::UInt(zip_with(&a, &b, f)?)
        }
        (Values::F32(a), Values::F32(b)) => {
            let f = float_kernel::<f32>(op).ok_or_else(|| unsupported(op, operand))?;
            Values::F32(zip_with(&a, &b, f)?)
        }
        (Values::F64(a), Values::F64(b)) => {
            let f = float_kernel::<f64>(op).ok_or_else(|| unsupported(op, operand))?;
            Values::F64(zip_with(&a, &b, f)?)
        }
        (Values::Bool(a), Values::Bool(b)) => {
            let f: fn(bool, bool) -> bool = match op {
                BinaryOp::BitAnd => |x, y| x & y,
                BinaryOp::BitOr => |x, y| x | y,
                BinaryOp::BitXor => |x, y| x ^ y,
                _ => return Err(unsupported(op, operand)),
            };
            Values::Bool(zip_with(&a, &b, f)?)
        }
        _ => return Err(unsupported(op, operand)),
    };
    Ok(out.wrap(operand))
}

/// Signed kernels on widened values. Division or remainder by zero yields 0;
/// floor division and remainder round toward negative infinity.
fn int_kernel(op: BinaryOp) -> Option<fn(i64, i64) -> i64> {
    let f: fn(i64, i64) -> i64 = match op {
        BinaryOp::Add => i64::wrapping_add,
        BinaryOp::Sub => i64::wrapping_sub,
        BinaryOp::Mul => i64::wrapping_mul,
        BinaryOp::FloorDiv => |x, y| {
            if y == 0 {
                return 0;
            }
            let q = x.wrapping_div(y);
            if x.wrapping_rem(y) != 0 && ((x < 0) != (y < 0)) {
                q - 1
            } else {
                q
            }
        },
        BinaryOp::Rem => |x, y| {
            if y == 0 {
                return 0;
            }
            let r = x.wrapping_rem(y);
            if r != 0 && ((r < 0) != (y < 0)) {
                r + y
            } else {
                r
            }
        },
        // Negative exponents have no integer result.
        BinaryOp::Pow => |x, y| {
            if y < 0 {
                0
            } else {
                x.wrapping_pow(y.min(u32::MAX as i64) as u32)
            }
        },
        BinaryOp::BitAnd => |x, y| x & y,
        BinaryOp::BitOr => |x, y| x | y,
        BinaryOp::BitXor => |x, y| x ^ y,
        BinaryOp::Div => return None,
    };
    Some(f)
}

fn uint_kernel(op: BinaryOp) -> Option<fn(u64, u64) -> u64> {
    let f: fn(u64, u64) -> u64 = match op {
        BinaryOp::Add => u64::wrapping_add,
        BinaryOp::Sub => u64::wrapping_sub,
        BinaryOp::Mul => u64::wrapping_mul,
        BinaryOp::FloorDiv => |x, y| if y == 0 { 0 } else { x / y },
        BinaryOp::Rem => |x, y| if y == 0 { 0 } else { x % y },
        BinaryOp::Pow => |x, y| x.wrapping_pow(y.min(u32::MAX as u64) as u32),
        BinaryOp::BitAnd => |x, y| x & y,
        BinaryOp::BitOr => |x, y| x | y,
        BinaryOp::BitXor => |x, y| x ^ y,
        BinaryOp::Div => return None,
    };
    Some(f)
}

fn float_kernel<F: Float>(op: BinaryOp) -> Option<fn(F, F) -> F> {
    let f: fn(F, F) -> F = match op {
        BinaryOp::Add => |x, y| x + y,
        BinaryOp::Sub => |x, y| x - y,
        BinaryOp::Mul => |x, y| x * y,
        BinaryOp::Div => |x, y| x / y,
        BinaryOp::FloorDiv => |x, y| (x / y).floor(),
        BinaryOp::Rem => |x, y| {
            let r = x % y;
            if r != F::zero() && ((r < F::zero()) != (y < F::zero())) {
                r + y
            } else {
                r
            }
        },
        // Integral exponents multiply, so `x ** 2` is exactly `x * x`.
        BinaryOp::Pow => |x, y| match y.to_i32() {
            Some(n) if y.fract() == F::zero() => x.powi(n),
            _ => x.powf(y),
        },
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => return None,
    };
    Some(f)
}

//==================================================================================
// Comparison
//==================================================================================

fn apply_compare(op: CompareOp, operand: ScalarKind, lhs: &Values, rhs: &Values) -> Result<Values> {
    let out = match (lhs.cast(operand), rhs.cast(operand)) {
        (Values::Bool(a), Values::Bool(b)) => zip_with(&a, &b, compare_kernel(op))?,
        (Values::Int(a), Values::Int(b)) => zip_with(&a, &b, compare_kernel(op))?,
        (Values::UInt(a), Values::UInt(b)) => zip_with(&a, &b, compare_kernel(op))?,
        (Values::F32(a), Values::F32(b)) => zip_with(&a, &b, compare_kernel(op))?,
        (Values::F64(a), Values::F64(b)) => zip_with(&a, &b, compare_kernel(op))?,
        _ => return Err(unsupported(op, operand)),
    };
    Ok(Values::Bool(out))
}

fn compare_kernel<T: PartialOrd>(op: CompareOp) -> fn(T, T) -> bool {
    match op {
        CompareOp::Lt => |x, y| x < y,
        CompareOp::Le => |x, y| x <= y,
        CompareOp::Gt => |x, y| x > y,
        CompareOp::Ge => |x, y| x >= y,
        CompareOp::Eq => |x, y| x == y,
        CompareOp::Ne => |x, y| x != y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: Vec<i64>) -> Values {
        Values::Int(ArrayD::from_shape_vec(IxDyn(&[values.len()]), values).unwrap())
    }

    #[test]
    fn test_integer_division_semantics() {
        let a = ints(vec![7, -7, 5, 3]);
        let b = ints(vec![2, 2, 0, -2]);
        let floor = apply_binary(BinaryOp::FloorDiv, ScalarKind::Int32, &a, &b).unwrap();
        assert_eq!(floor, ints(vec![3, -4, 0, -2]));
        let rem = apply_binary(BinaryOp::Rem, ScalarKind::Int32, &a, &b).unwrap();
        assert_eq!(rem, ints(vec![1, 1, 0, -1]));
    }

    #[test]
    fn test_narrow_integers_wrap() {
        let a = ints(vec![100, -128]);
        let b = ints(vec![100, 1]);
        let sum = apply_binary(BinaryOp::Add, ScalarKind::Int8, &a, &b).unwrap();
        assert_eq!(sum, ints(vec![-56, -127]));
        let neg = apply_unary(UnaryOp::Neg, ScalarKind::Int8, ints(vec![-128])).unwrap();
        assert_eq!(neg, ints(vec![-128]));
    }

    #[test]
    fn test_float_pow_with_integral_exponent_is_exact() {
        let x = Values::F32(ArrayD::from_shape_vec(IxDyn(&[3]), vec![0.1f32, 1.7, -3.3]).unwrap());
        let two = scalar_values(Scalar::Float(2.0));
        let squared = apply_binary(BinaryOp::Pow, ScalarKind::Float32, &x, &two).unwrap();
        let Values::F32(s) = squared else { panic!("expected f32") };
        for (v, sq) in [0.1f32, 1.7, -3.3].iter().zip(s.iter()) {
            assert_eq!(v * v, *sq);
        }
    }

    #[test]
    fn test_comparisons_promote_operands() {
        let a = ints(vec![1, 2, 3]);
        let b = Values::F64(ArrayD::from_elem(IxDyn(&[]), 2.5));
        let lt = apply_compare(CompareOp::Lt, ScalarKind::Float64, &a, &b).unwrap();
        assert_eq!(lt.to_bool().into_raw_vec_and_offset().0, vec![true, true, false]);
    }
}
