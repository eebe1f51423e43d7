//! Lazy elementwise expressions over `NDArray`s and their chunk-parallel
//! evaluation.

mod compute;
pub mod evaluator;
pub mod node;
pub mod ops;
pub mod udf;
pub mod values;

pub use evaluator::Evaluator;
pub use node::{broadcast_shapes, BinaryOp, CompareOp, ExprNode, Scalar, UnaryOp};
pub use ops::LazyExpr;
pub use udf::{Udf, UdfFn};
pub use values::Values;
