//! This module defines the core, strongly-typed data representations used
//! throughout the array store.
//!
//! It currently includes the canonical `DType` enum (scalar, byte-string and
//! structured element layouts) and its descriptor strings.

pub mod dtype;

// Re-export the main type(s) for easier access.
pub use dtype::{DType, Field, ScalarKind};
