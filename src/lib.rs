//! This file is the root of the `tambak_array` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of the library (`store`, `array`,
//!     `expr`, `tensor`, ...) so the Rust compiler knows they exist.
//! 2.  Re-exporting the types most callers need, so that
//!     `use tambak_array::{NDArray, LazyExpr, Evaluator}` is enough.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//==================================================================================
// 1. Module Declarations
//==================================================================================
#[macro_use]
pub mod observability; // Make macros available throughout the crate

pub mod array;
pub mod codec;
pub mod config;
pub mod error;
pub mod expr;
pub mod frame;
pub mod kernels;
pub mod store;
pub mod tensor;
pub mod traits;
pub mod types;

//==================================================================================
// 2. Public Surface
//==================================================================================
pub use array::{Buffer, FieldView, NDArray, Region, Slice};
pub use config::{ArrayParams, CodecConfig, CodecId, EvalConfig, Filter, PackParams};
pub use error::{Result, TambakError};
pub use expr::{Evaluator, LazyExpr, Udf, Values};
pub use observability::enable_verbose_logging;
pub use store::{ChunkStore, MetaValue};
pub use tensor::{Tensor, TensorBuffer};
pub use types::{DType, ScalarKind};
