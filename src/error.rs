// In: src/error.rs

//! This module defines the single, unified error type for the entire tambak array library.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.
//!
//! Structural errors (`ShapeMismatch`, `DTypeMismatch`, `IndexOutOfRange`) are raised
//! before any chunk is read or written. Codec and I/O errors raised while chunks are
//! being processed abort the whole enclosing call.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TambakError {
    // =========================================================================
    // === Structural Errors (validated eagerly, before any chunk I/O)
    // =========================================================================
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Data type mismatch: {0}")]
    DTypeMismatch(String),

    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // =========================================================================
    // === Chunk & Codec Errors
    // =========================================================================
    #[error("Codec failure on chunk {chunk}: {reason}")]
    Codec { chunk: usize, reason: String },

    #[error("Checksum mismatch on chunk {chunk}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        chunk: usize,
        stored: u32,
        computed: u32,
    },

    #[error("Chunk store was modified concurrently: expected revision {expected}, found {found}")]
    ConcurrentModification { expected: u64, found: u64 },

    // =========================================================================
    // === Frame & Metadata Errors
    // =========================================================================
    #[error("Metadata key not found: '{0}'")]
    MetadataKey(String),

    #[error("Frame serialization/deserialization failed: {0}")]
    FrameFormatError(String),

    #[error("Frame version {found} is newer than the supported version {supported}")]
    IncompatibleVersion { found: u16, supported: u16 },

    #[error("Buffer of {size} bytes exceeds the {limit} byte limit of the single-blob path")]
    SizeLimitExceeded { size: usize, limit: usize },

    // =========================================================================
    // === Evaluation Errors
    // =========================================================================
    #[error("User-defined function failed: {0}")]
    UserFunction(String),

    #[error("Internal logic error (this is a bug): {0}")]
    InternalError(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the underlying I/O subsystem (e.g., a missing sparse chunk file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library, typically during metadata or codec config encoding.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error from a safe byte-casting operation failing.
    #[error("Byte slice casting error: {0}")]
    PodCast(String), // Manual `From` impl is needed as bytemuck::PodCastError doesn't impl Error
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TambakError>;

// =============================================================================
// === Manual `From` Implementations ===
// =============================================================================

impl From<bytemuck::PodCastError> for TambakError {
    fn from(err: bytemuck::PodCastError) -> Self {
        TambakError::PodCast(err.to_string())
    }
}

impl TambakError {
    /// Wraps a codec failure with the index of the chunk being processed.
    pub(crate) fn codec(chunk: usize, reason: impl ToString) -> Self {
        TambakError::Codec {
            chunk,
            reason: reason.to_string(),
        }
    }

    /// Re-targets a chunk-scoped error at a different chunk index. Codec kernels
    /// do not know which chunk they run on; the store fills it in.
    pub(crate) fn at_chunk(self, index: usize) -> Self {
        match self {
            TambakError::Codec { reason, .. } => TambakError::Codec {
                chunk: index,
                reason,
            },
            TambakError::ChecksumMismatch {
                stored, computed, ..
            } => TambakError::ChecksumMismatch {
                chunk: index,
                stored,
                computed,
            },
            other => other,
        }
    }
}
