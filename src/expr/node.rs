//! The expression tree. Nodes are immutable, shared via `Arc`, and carry their
//! broadcast shape and result dtype, both inferred when the node is built.
//! Building a node never reads chunk data.

use std::sync::Arc;

use crate::array::{FieldView, NDArray};
use crate::error::{Result, TambakError};
use crate::expr::udf::Udf;
use crate::types::dtype::Category;
use crate::types::ScalarKind;

/// A Python-style scalar operand. Scalars are "weak": they adapt to the
/// dtype of the array they are combined with where that loses nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::Int(_) => ScalarKind::Int64,
            Scalar::Float(_) => ScalarKind::Float64,
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float(v as f64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

#[derive(Debug, Clone)]
pub enum Leaf {
    Array(Arc<NDArray>),
    Field(FieldView),
    Scalar(Scalar),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// True division; the result is always floating point.
    Div,
    FloorDiv,
    Rem,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug)]
pub enum NodeKind {
    Leaf(Leaf),
    Unary {
        op: UnaryOp,
        operand: Arc<ExprNode>,
    },
    /// `operand` is the kind both sides are cast to before the op runs.
    Binary {
        op: BinaryOp,
        lhs: Arc<ExprNode>,
        rhs: Arc<ExprNode>,
        operand: ScalarKind,
    },
    Compare {
        op: CompareOp,
        lhs: Arc<ExprNode>,
        rhs: Arc<ExprNode>,
        operand: ScalarKind,
    },
    Udf {
        udf: Udf,
        inputs: Vec<Arc<ExprNode>>,
    },
}

#[derive(Debug)]
pub struct ExprNode {
    kind: NodeKind,
    shape: Vec<usize>,
    dtype: ScalarKind,
    weak: bool,
}

//==================================================================================
// Shape & dtype inference
//==================================================================================

/// NumPy broadcasting: align trailing dimensions; size-1 stretches.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut out = vec![0; ndim];
    for i in 0..ndim {
        let da = if i < ndim - a.len() { 1 } else { a[i - (ndim - a.len())] };
        let db = if i < ndim - b.len() { 1 } else { b[i - (ndim - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(TambakError::ShapeMismatch(format!(
                    "shapes {:?} and {:?} cannot be broadcast together",
                    a, b
                )))
            }
        };
    }
    Ok(out)
}

/// The kind a weak scalar operand resolves to against a strong one.
fn weak_against(weak: ScalarKind, strong: ScalarKind) -> ScalarKind {
    match (weak.category(), strong.category()) {
        (Category::Float, Category::Float) => strong,
        (Category::Float, _) => ScalarKind::Float64,
        (Category::Signed | Category::Unsigned, Category::Bool) => ScalarKind::Int64,
        _ => strong,
    }
}

/// Operand kind and weakness of a binary combination.
fn combine(lhs: &ExprNode, rhs: &ExprNode) -> (ScalarKind, bool) {
    match (lhs.weak, rhs.weak) {
        (true, false) => (weak_against(lhs.dtype, rhs.dtype), false),
        (false, true) => (weak_against(rhs.dtype, lhs.dtype), false),
        (weak, _) => (ScalarKind::promote(lhs.dtype, rhs.dtype), weak),
    }
}

fn unary_dtype(op: UnaryOp, kind: ScalarKind) -> Result<ScalarKind> {
    use ScalarKind::*;
    match op {
        UnaryOp::Neg if kind == Bool => Err(TambakError::DTypeMismatch(
            "negation is not defined for booleans; use Not".into(),
        )),
        UnaryOp::Not if kind.is_float() => Err(TambakError::DTypeMismatch(format!(
            "logical/bitwise not is not defined for {}",
            kind
        ))),
        UnaryOp::Neg | UnaryOp::Not | UnaryOp::Abs => Ok(kind),
        UnaryOp::Sqrt | UnaryOp::Exp | UnaryOp::Log | UnaryOp::Sin | UnaryOp::Cos => Ok(match kind {
            Float32 | Bool | Int8 | UInt8 | Int16 | UInt16 => Float32,
            _ => Float64,
        }),
    }
}

impl ExprNode {
    pub fn leaf_array(array: Arc<NDArray>) -> Result<Arc<Self>> {
        let dtype = array.dtype().scalar_kind().ok_or_else(|| {
            TambakError::DTypeMismatch(format!(
                "arithmetic is not defined for {}; select a field first",
                array.dtype()
            ))
        })?;
        Ok(Arc::new(Self {
            shape: array.shape().to_vec(),
            kind: NodeKind::Leaf(Leaf::Array(array)),
            dtype,
            weak: false,
        }))
    }

    pub fn leaf_field(field: FieldView) -> Result<Arc<Self>> {
        let dtype = field.dtype().scalar_kind().ok_or_else(|| {
            TambakError::DTypeMismatch(format!(
                "field '{}' of type {} is not numeric",
                field.name(),
                field.dtype()
            ))
        })?;
        Ok(Arc::new(Self {
            shape: field.shape().to_vec(),
            kind: NodeKind::Leaf(Leaf::Field(field)),
            dtype,
            weak: false,
        }))
    }

    pub fn leaf_scalar(value: Scalar) -> Arc<Self> {
        Arc::new(Self {
            shape: Vec::new(),
            dtype: value.kind(),
            kind: NodeKind::Leaf(Leaf::Scalar(value)),
            weak: true,
        })
    }

    pub fn unary(op: UnaryOp, operand: Arc<ExprNode>) -> Result<Arc<Self>> {
        let dtype = unary_dtype(op, operand.dtype)?;
        Ok(Arc::new(Self {
            shape: operand.shape.clone(),
            weak: operand.weak,
            dtype,
            kind: NodeKind::Unary { op, operand },
        }))
    }

    pub fn binary(op: BinaryOp, lhs: Arc<ExprNode>, rhs: Arc<ExprNode>) -> Result<Arc<Self>> {
        let shape = broadcast_shapes(&lhs.shape, &rhs.shape)?;
        let (mut operand, weak) = combine(&lhs, &rhs);
        match op {
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if operand.is_float() {
                    return Err(TambakError::DTypeMismatch(format!(
                        "{:?} is not defined for {}",
                        op, operand
                    )));
                }
            }
            BinaryOp::Div => {
                if !operand.is_float() {
                    operand = ScalarKind::Float64;
                }
            }
            _ => {
                if operand == ScalarKind::Bool {
                    operand = ScalarKind::Int8;
                }
            }
        }
        Ok(Arc::new(Self {
            shape,
            dtype: operand,
            weak,
            kind: NodeKind::Binary {
                op,
                lhs,
                rhs,
                operand,
            },
        }))
    }

    pub fn compare(op: CompareOp, lhs: Arc<ExprNode>, rhs: Arc<ExprNode>) -> Result<Arc<Self>> {
        let shape = broadcast_shapes(&lhs.shape, &rhs.shape)?;
        let (operand, weak) = combine(&lhs, &rhs);
        Ok(Arc::new(Self {
            shape,
            dtype: ScalarKind::Bool,
            weak,
            kind: NodeKind::Compare {
                op,
                lhs,
                rhs,
                operand,
            },
        }))
    }

    /// A user function over `inputs`; the output shape is their broadcast shape.
    pub fn udf(udf: Udf, inputs: Vec<Arc<ExprNode>>) -> Result<Arc<Self>> {
        let mut shape = match inputs.first() {
            Some(first) => first.shape.clone(),
            None => {
                return Err(TambakError::InvalidParameter(format!(
                    "user function '{}' needs at least one input",
                    udf.name()
                )))
            }
        };
        for input in &inputs[1..] {
            shape = broadcast_shapes(&shape, &input.shape)?;
        }
        Ok(Arc::new(Self {
            shape,
            dtype: udf.dtype(),
            weak: false,
            kind: NodeKind::Udf { udf, inputs },
        }))
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> ScalarKind {
        self.dtype
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    /// Every array read by this tree (field leaves report their parent), in
    /// left-to-right order.
    pub fn arrays(&self) -> Vec<Arc<NDArray>> {
        let mut out = Vec::new();
        self.collect_arrays(&mut out);
        out
    }

    fn collect_arrays(&self, out: &mut Vec<Arc<NDArray>>) {
        match &self.kind {
            NodeKind::Leaf(Leaf::Array(a)) => out.push(Arc::clone(a)),
            NodeKind::Leaf(Leaf::Field(f)) => out.push(Arc::clone(f.parent())),
            NodeKind::Leaf(Leaf::Scalar(_)) => {}
            NodeKind::Unary { operand, .. } => operand.collect_arrays(out),
            NodeKind::Binary { lhs, rhs, .. } | NodeKind::Compare { lhs, rhs, .. } => {
                lhs.collect_arrays(out);
                rhs.collect_arrays(out);
            }
            NodeKind::Udf { inputs, .. } => inputs.iter().for_each(|i| i.collect_arrays(out)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(broadcast_shapes(&[3, 1], &[4]).unwrap(), vec![3, 4]);
        assert_eq!(broadcast_shapes(&[], &[2, 5]).unwrap(), vec![2, 5]);
        assert_eq!(broadcast_shapes(&[1, 5, 1], &[7, 1, 2]).unwrap(), vec![7, 5, 2]);
        assert!(matches!(
            broadcast_shapes(&[3], &[4]),
            Err(TambakError::ShapeMismatch(_))
        ));
    }

    fn strong(kind: ScalarKind) -> ExprNode {
        ExprNode {
            kind: NodeKind::Leaf(Leaf::Scalar(Scalar::Int(0))),
            shape: vec![4],
            dtype: kind,
            weak: false,
        }
    }

    #[test]
    fn test_weak_scalars_keep_array_kind() {
        use ScalarKind::*;
        let int = ExprNode::leaf_scalar(Scalar::Int(2));
        let float = ExprNode::leaf_scalar(Scalar::Float(0.5));
        assert_eq!(combine(&strong(Float32), &float).0, Float32);
        assert_eq!(combine(&int, &strong(Int16)).0, Int16);
        assert_eq!(combine(&strong(UInt8), &float).0, Float64);
        assert_eq!(combine(&strong(Float32), &strong(Int32)).0, Float64);
        assert!(combine(&int, &float).1);
    }

    #[test]
    fn test_result_dtypes() {
        use ScalarKind::*;
        let a = Arc::new(strong(Int32));
        let b = Arc::new(strong(Float32));
        let div = ExprNode::binary(BinaryOp::Div, a.clone(), a.clone()).unwrap();
        assert_eq!(div.dtype(), Float64);
        let cmp = ExprNode::compare(CompareOp::Lt, a.clone(), b.clone()).unwrap();
        assert_eq!(cmp.dtype(), Bool);
        assert!(ExprNode::binary(BinaryOp::BitAnd, b.clone(), a.clone()).is_err());
        assert!(ExprNode::unary(UnaryOp::Not, b.clone()).is_err());
        assert_eq!(ExprNode::unary(UnaryOp::Sqrt, b).unwrap().dtype(), Float32);
    }
}
