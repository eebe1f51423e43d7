//! Physical layouts for a chunk store: one contiguous byte buffer, or a sparse
//! directory with one file per chunk. Both share the header in [`format`].

pub mod contiguous;
pub mod format;
pub mod sparse;

pub use contiguous::{from_frame, to_frame};
pub use format::{FrameHeader, FRAME_FORMAT_VERSION, FRAME_MAGIC};
pub use sparse::{open_sparse, write_sparse, SparseFrame};
