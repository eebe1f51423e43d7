//! The pure, stateless byte kernels the chunk codec is assembled from.
//!
//! Each kernel takes a byte slice and returns a new buffer; none of them know
//! about chunks, stores or dtypes. The `codec` module composes them.

pub mod shuffle;
pub mod xor_delta;
pub mod zstd;
