//! The storage substrate shared by `NDArray` and the tensor adapter: compressed
//! chunks, the chunk store that orders them, and the metadata attached to it.

pub mod chunk;
pub mod metadata;
pub mod super_chunk;

pub use chunk::{Chunk, ChunkHeader};
pub use metadata::{MetaValue, MetadataStore};
pub use super_chunk::{ChunkSource, ChunkStore};
