//! `LazyExpr`: the user-facing handle on an expression tree.
//!
//! Builder methods (`add`, `pow`, `lt`, ...) validate eagerly and return a
//! `Result`. The `std::ops` operators return a `LazyExpr` directly so they can
//! be chained; a structural error is carried inside the expression and
//! surfaces from [`LazyExpr::node`] (and so from evaluation, before any
//! chunk is read).

use std::ops;
use std::sync::Arc;

use crate::array::{FieldView, NDArray};
use crate::error::{Result, TambakError};
use crate::expr::node::{BinaryOp, CompareOp, ExprNode, Scalar, UnaryOp};
use crate::expr::udf::Udf;
use crate::types::ScalarKind;

#[derive(Debug, Clone)]
pub struct LazyExpr {
    inner: std::result::Result<Arc<ExprNode>, Arc<TambakError>>,
}

/// Re-raises an error captured during operator chaining.
fn replay(err: &TambakError) -> TambakError {
    match err {
        TambakError::ShapeMismatch(m) => TambakError::ShapeMismatch(m.clone()),
        TambakError::DTypeMismatch(m) => TambakError::DTypeMismatch(m.clone()),
        TambakError::InvalidParameter(m) => TambakError::InvalidParameter(m.clone()),
        other => TambakError::InternalError(other.to_string()),
    }
}

impl From<Arc<ExprNode>> for LazyExpr {
    fn from(node: Arc<ExprNode>) -> Self {
        Self { inner: Ok(node) }
    }
}

impl LazyExpr {
    fn wrap(result: Result<Arc<ExprNode>>) -> Self {
        Self {
            inner: result.map_err(Arc::new),
        }
    }

    pub fn array(array: Arc<NDArray>) -> Result<Self> {
        ExprNode::leaf_array(array).map(Self::from)
    }

    pub fn field(field: FieldView) -> Result<Self> {
        ExprNode::leaf_field(field).map(Self::from)
    }

    pub fn scalar(value: impl Into<Scalar>) -> Self {
        ExprNode::leaf_scalar(value.into()).into()
    }

    pub fn udf(udf: Udf, inputs: &[LazyExpr]) -> Result<Self> {
        let nodes = inputs
            .iter()
            .map(|e| e.node().cloned())
            .collect::<Result<Vec<_>>>()?;
        ExprNode::udf(udf, nodes).map(Self::from)
    }

    /// The root node, or the first structural error met while building.
    pub fn node(&self) -> Result<&Arc<ExprNode>> {
        self.inner.as_ref().map_err(|e| replay(e))
    }

    pub fn shape(&self) -> Result<&[usize]> {
        Ok(self.node()?.shape())
    }

    pub fn dtype(&self) -> Result<ScalarKind> {
        Ok(self.node()?.dtype())
    }

    //==============================================================================
    // Builders
    //==============================================================================

    pub fn unary(&self, op: UnaryOp) -> Result<Self> {
        ExprNode::unary(op, self.node()?.clone()).map(Self::from)
    }

    pub fn binary(&self, op: BinaryOp, rhs: impl Into<LazyExpr>) -> Result<Self> {
        let rhs = rhs.into();
        ExprNode::binary(op, self.node()?.clone(), rhs.node()?.clone()).map(Self::from)
    }

    pub fn compare(&self, op: CompareOp, rhs: impl Into<LazyExpr>) -> Result<Self> {
        let rhs = rhs.into();
        ExprNode::compare(op, self.node()?.clone(), rhs.node()?.clone()).map(Self::from)
    }

    pub fn pow(&self, rhs: impl Into<LazyExpr>) -> Result<Self> {
        self.binary(BinaryOp::Pow, rhs)
    }

    pub fn floor_div(&self, rhs: impl Into<LazyExpr>) -> Result<Self> {
        self.binary(BinaryOp::FloorDiv, rhs)
    }

    pub fn lt(&self, rhs: impl Into<LazyExpr>) -> Result<Self> {
        self.compare(CompareOp::Lt, rhs)
    }

    pub fn le(&self, rhs: impl Into<LazyExpr>) -> Result<Self> {
        self.compare(CompareOp::Le, rhs)
    }

    pub fn gt(&self, rhs: impl Into<LazyExpr>) -> Result<Self> {
        self.compare(CompareOp::Gt, rhs)
    }

    pub fn ge(&self, rhs: impl Into<LazyExpr>) -> Result<Self> {
        self.compare(CompareOp::Ge, rhs)
    }

    pub fn equals(&self, rhs: impl Into<LazyExpr>) -> Result<Self> {
        self.compare(CompareOp::Eq, rhs)
    }

    pub fn not_equals(&self, rhs: impl Into<LazyExpr>) -> Result<Self> {
        self.compare(CompareOp::Ne, rhs)
    }

    pub fn abs(&self) -> Result<Self> {
        self.unary(UnaryOp::Abs)
    }

    pub fn sqrt(&self) -> Result<Self> {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn exp(&self) -> Result<Self> {
        self.unary(UnaryOp::Exp)
    }

    pub fn ln(&self) -> Result<Self> {
        self.unary(UnaryOp::Log)
    }

    pub fn sin(&self) -> Result<Self> {
        self.unary(UnaryOp::Sin)
    }

    pub fn cos(&self) -> Result<Self> {
        self.unary(UnaryOp::Cos)
    }

    fn chain_binary(&self, op: BinaryOp, rhs: &LazyExpr) -> LazyExpr {
        match (&self.inner, &rhs.inner) {
            (Ok(l), Ok(r)) => Self::wrap(ExprNode::binary(op, l.clone(), r.clone())),
            (Err(e), _) | (_, Err(e)) => Self {
                inner: Err(Arc::clone(e)),
            },
        }
    }

    fn chain_unary(&self, op: UnaryOp) -> LazyExpr {
        match &self.inner {
            Ok(node) => Self::wrap(ExprNode::unary(op, node.clone())),
            Err(e) => Self {
                inner: Err(Arc::clone(e)),
            },
        }
    }
}

impl From<Scalar> for LazyExpr {
    fn from(value: Scalar) -> Self {
        LazyExpr::scalar(value)
    }
}

impl From<f64> for LazyExpr {
    fn from(value: f64) -> Self {
        LazyExpr::scalar(value)
    }
}

impl From<i64> for LazyExpr {
    fn from(value: i64) -> Self {
        LazyExpr::scalar(value)
    }
}

impl From<&LazyExpr> for LazyExpr {
    fn from(value: &LazyExpr) -> Self {
        value.clone()
    }
}

//==================================================================================
// std::ops
//==================================================================================

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait<&LazyExpr> for &LazyExpr {
            type Output = LazyExpr;
            fn $method(self, rhs: &LazyExpr) -> LazyExpr {
                self.chain_binary($op, rhs)
            }
        }

        impl ops::$trait<LazyExpr> for LazyExpr {
            type Output = LazyExpr;
            fn $method(self, rhs: LazyExpr) -> LazyExpr {
                self.chain_binary($op, &rhs)
            }
        }

        impl ops::$trait<&LazyExpr> for LazyExpr {
            type Output = LazyExpr;
            fn $method(self, rhs: &LazyExpr) -> LazyExpr {
                self.chain_binary($op, rhs)
            }
        }

        impl ops::$trait<LazyExpr> for &LazyExpr {
            type Output = LazyExpr;
            fn $method(self, rhs: LazyExpr) -> LazyExpr {
                self.chain_binary($op, &rhs)
            }
        }

        impl_binary_op!(@scalar $trait, $method, $op, f64);
        impl_binary_op!(@scalar $trait, $method, $op, i64);
    };
    (@scalar $trait:ident, $method:ident, $op:expr, $scalar:ty) => {
        impl ops::$trait<$scalar> for &LazyExpr {
            type Output = LazyExpr;
            fn $method(self, rhs: $scalar) -> LazyExpr {
                self.chain_binary($op, &LazyExpr::scalar(rhs))
            }
        }

        impl ops::$trait<$scalar> for LazyExpr {
            type Output = LazyExpr;
            fn $method(self, rhs: $scalar) -> LazyExpr {
                self.chain_binary($op, &LazyExpr::scalar(rhs))
            }
        }

        impl ops::$trait<&LazyExpr> for $scalar {
            type Output = LazyExpr;
            fn $method(self, rhs: &LazyExpr) -> LazyExpr {
                LazyExpr::scalar(self).chain_binary($op, rhs)
            }
        }

        impl ops::$trait<LazyExpr> for $scalar {
            type Output = LazyExpr;
            fn $method(self, rhs: LazyExpr) -> LazyExpr {
                LazyExpr::scalar(self).chain_binary($op, &rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);
impl_binary_op!(Rem, rem, BinaryOp::Rem);
impl_binary_op!(BitAnd, bitand, BinaryOp::BitAnd);
impl_binary_op!(BitOr, bitor, BinaryOp::BitOr);
impl_binary_op!(BitXor, bitxor, BinaryOp::BitXor);

impl ops::Neg for &LazyExpr {
    type Output = LazyExpr;
    fn neg(self) -> LazyExpr {
        self.chain_unary(UnaryOp::Neg)
    }
}

impl ops::Neg for LazyExpr {
    type Output = LazyExpr;
    fn neg(self) -> LazyExpr {
        self.chain_unary(UnaryOp::Neg)
    }
}

impl ops::Not for &LazyExpr {
    type Output = LazyExpr;
    fn not(self) -> LazyExpr {
        self.chain_unary(UnaryOp::Not)
    }
}

impl ops::Not for LazyExpr {
    type Output = LazyExpr;
    fn not(self) -> LazyExpr {
        self.chain_unary(UnaryOp::Not)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArrayParams;
    use ndarray::{ArrayD, IxDyn};

    fn leaf(shape: &[usize]) -> LazyExpr {
        let data = ArrayD::<f64>::zeros(IxDyn(shape));
        LazyExpr::array(Arc::new(NDArray::from_ndarray(&data, &ArrayParams::default()).unwrap())).unwrap()
    }

    #[test]
    fn test_operators_build_broadcast_shapes() {
        let a = leaf(&[3, 1]);
        let b = leaf(&[4]);
        let expr = (&a + &b) * 2.0 - 1i64;
        assert_eq!(expr.shape().unwrap(), &[3, 4]);
        assert_eq!(expr.dtype().unwrap(), ScalarKind::Float64);
    }

    #[test]
    fn test_chained_errors_surface_from_node() {
        let a = leaf(&[3]);
        let b = leaf(&[4]);
        let expr = (&a + &b) * 2.0;
        assert!(matches!(expr.node(), Err(TambakError::ShapeMismatch(_))));
        assert!(matches!(a.binary(BinaryOp::Add, &b), Err(TambakError::ShapeMismatch(_))));
        assert!(matches!((&a & &a).node(), Err(TambakError::DTypeMismatch(_))));
    }

    #[test]
    fn test_builders_and_comparisons() {
        let a = leaf(&[5]);
        let expr = a.pow(2i64).unwrap().gt(&a).unwrap();
        assert_eq!(expr.dtype().unwrap(), ScalarKind::Bool);
        let mask = !&expr;
        assert_eq!(mask.dtype().unwrap(), ScalarKind::Bool);
    }
}
