// In: src/config.rs

//! The single source of truth for all tambak array configuration.
//!
//! Every struct here is created once at the application boundary (in code or
//! from a JSON document) and then handed down by reference. There is no
//! process-wide mutable state: the thread count for evaluation lives in
//! [`EvalConfig`] and is consumed when an `Evaluator` is built.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TambakError};

//==================================================================================
// I. Codec Configuration
//==================================================================================

/// Identifies the entropy coder used for every block of a chunk.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CodecId {
    /// **Default:** Zstandard via the `zstd` crate.
    #[default]
    Zstd,
    /// No entropy coding; blocks are stored as produced by the filter pipeline.
    Noop,
}

impl CodecId {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            CodecId::Zstd => 1,
            CodecId::Noop => 0,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(CodecId::Noop),
            1 => Ok(CodecId::Zstd),
            other => Err(TambakError::FrameFormatError(format!(
                "Unknown codec id {}",
                other
            ))),
        }
    }
}

/// A byte-level pre-transform applied to each block before the codec runs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Groups the i-th byte of every element together (byte planes).
    Shuffle,
    /// XORs every element with its predecessor.
    Delta,
}

impl Filter {
    pub(crate) fn bit(self) -> u8 {
        match self {
            Filter::Shuffle => 0b01,
            Filter::Delta => 0b10,
        }
    }
}

/// Compression parameters bound to a chunk store at creation time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    #[serde(default)]
    pub codec: CodecId,

    /// Compression level in `0..=9`. Level 0 stores blocks uncompressed.
    #[serde(default = "default_level")]
    pub level: u8,

    /// Applied in order on compression and in reverse on decompression.
    #[serde(default = "default_filters")]
    pub filters: Vec<Filter>,

    /// Size in bytes of the independently compressed blocks inside a chunk.
    /// `0` means "one block per chunk".
    #[serde(default)]
    pub block_size: usize,

    /// Element width in bytes, used by the shuffle and delta filters.
    #[serde(default = "default_typesize")]
    pub typesize: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            codec: CodecId::default(),
            level: default_level(),
            filters: default_filters(),
            block_size: 0,
            typesize: default_typesize(),
        }
    }
}

impl CodecConfig {
    /// Checks the parameter ranges. Called whenever a config is bound to a store.
    pub fn validate(&self) -> Result<()> {
        if self.level > 9 {
            return Err(TambakError::InvalidParameter(format!(
                "compression level must be in 0..=9, got {}",
                self.level
            )));
        }
        if self.typesize == 0 || self.typesize > 255 {
            return Err(TambakError::InvalidParameter(format!(
                "typesize must be in 1..=255, got {}",
                self.typesize
            )));
        }
        Ok(())
    }

    /// Returns a copy with a different element width.
    pub fn with_typesize(&self, typesize: usize) -> Self {
        Self {
            typesize,
            ..self.clone()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

//==================================================================================
// II. Array, Evaluation & Packing Parameters
//==================================================================================

/// Geometry and compression for a new `NDArray`. Missing shapes are derived
/// from the array shape and item size.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ArrayParams {
    #[serde(default)]
    pub chunks: Option<Vec<usize>>,
    #[serde(default)]
    pub blocks: Option<Vec<usize>>,
    #[serde(default)]
    pub codec: CodecConfig,
}

impl ArrayParams {
    pub fn chunks(mut self, chunks: &[usize]) -> Self {
        self.chunks = Some(chunks.to_vec());
        self
    }

    pub fn blocks(mut self, blocks: &[usize]) -> Self {
        self.blocks = Some(blocks.to_vec());
        self
    }

    pub fn codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }
}

/// Configuration for one evaluation. Every field is optional; omitted fields
/// default to the geometry and codec of the first array operand.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalConfig {
    #[serde(default)]
    pub chunks: Option<Vec<usize>>,
    #[serde(default)]
    pub blocks: Option<Vec<usize>>,
    #[serde(default)]
    pub codec: Option<CodecConfig>,
    /// Worker pool size. `None` uses the available parallelism; `Some(1)`
    /// evaluates on the calling thread.
    #[serde(default)]
    pub nthreads: Option<usize>,
}

impl EvalConfig {
    pub fn nthreads(mut self, nthreads: usize) -> Self {
        self.nthreads = Some(nthreads);
        self
    }

    pub fn chunks(mut self, chunks: &[usize]) -> Self {
        self.chunks = Some(chunks.to_vec());
        self
    }

    pub fn blocks(mut self, blocks: &[usize]) -> Self {
        self.blocks = Some(blocks.to_vec());
        self
    }

    pub fn codec(mut self, codec: CodecConfig) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Parameters for the tensor packing adapter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PackParams {
    #[serde(default)]
    pub codec: CodecConfig,

    /// **The target uncompressed size of each chunk in bytes.** Rounded down to
    /// a multiple of the item size.
    #[serde(default = "default_chunk_nbytes")]
    pub chunk_nbytes: usize,

    /// Single-file frame when `true`, directory of units when `false`.
    /// Only consulted by `save_tensor`.
    #[serde(default = "default_true")]
    pub contiguous: bool,
}

impl Default for PackParams {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            chunk_nbytes: default_chunk_nbytes(),
            contiguous: true,
        }
    }
}

impl PackParams {
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.codec.validate()?;
        Ok(params)
    }
}

//==================================================================================
// III. Serde default helpers
//==================================================================================

fn default_level() -> u8 {
    5
}

fn default_filters() -> Vec<Filter> {
    vec![Filter::Shuffle]
}

fn default_typesize() -> usize {
    1
}

fn default_chunk_nbytes() -> usize {
    4 * 1024 * 1024
}

/// Helper for `serde` to default a boolean field to true.
fn default_true() -> bool {
    true
}
