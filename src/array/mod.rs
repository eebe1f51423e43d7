//! Chunked N-dimensional arrays on top of the chunk store.

pub mod buffer;
pub mod fields;
pub mod grid;
pub mod nd;
pub mod region;

pub use buffer::Buffer;
pub use fields::FieldView;
pub use nd::{NDArray, NDARRAY_META_KEY};
pub use region::{Region, Selection, Slice};

#[cfg(test)]
mod nd_tests;
