//! This module defines the canonical, type-safe representation of element
//! layouts used throughout the array store, the evaluator and the tensor adapter.
//!
//! A `DType` is either a primitive scalar, a fixed-width byte string, or a
//! structured record of named fields at fixed byte offsets. Every dtype has a
//! string descriptor that is sufficient to rebuild it; that descriptor is what
//! the tensor adapter stores under the `dtype` metadata key.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TambakError};

//==================================================================================
// 1. Scalar Kinds
//==================================================================================

/// The primitive element types the evaluator can compute with.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

/// Coarse classification used by the promotion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Category {
    Bool,
    Signed,
    Unsigned,
    Float,
}

impl ScalarKind {
    pub fn itemsize(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub(crate) fn category(&self) -> Category {
        match self {
            Self::Bool => Category::Bool,
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => Category::Signed,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64 => Category::Unsigned,
            Self::Float32 | Self::Float64 => Category::Float,
        }
    }

    /// Returns `true` if the data type is a signed or unsigned integer.
    pub fn is_int(&self) -> bool {
        matches!(self.category(), Category::Signed | Category::Unsigned)
    }

    /// Returns `true` if the data type is a floating-point number.
    pub fn is_float(&self) -> bool {
        self.category() == Category::Float
    }

    fn signed_of_bits(bits: usize) -> Self {
        match bits {
            8 => Self::Int8,
            16 => Self::Int16,
            32 => Self::Int32,
            _ => Self::Int64,
        }
    }

    /// Widening promotion for two operand kinds. Never truncates: a mix of
    /// `u64` and a signed type, or of `f32` and a wide integer, goes to `f64`.
    pub fn promote(a: ScalarKind, b: ScalarKind) -> ScalarKind {
        use Category::*;
        if a == b {
            return a;
        }
        let (abits, bbits) = (a.itemsize() * 8, b.itemsize() * 8);
        match (a.category(), b.category()) {
            (Bool, _) => b,
            (_, Bool) => a,
            (Float, Float) => {
                if abits >= bbits {
                    a
                } else {
                    b
                }
            }
            (Float, _) => Self::float_with_int(abits, bbits),
            (_, Float) => Self::float_with_int(bbits, abits),
            (Signed, Signed) | (Unsigned, Unsigned) => {
                if abits >= bbits {
                    a
                } else {
                    b
                }
            }
            (Signed, Unsigned) => Self::signed_with_unsigned(abits, bbits),
            (Unsigned, Signed) => Self::signed_with_unsigned(bbits, abits),
        }
    }

    fn float_with_int(float_bits: usize, int_bits: usize) -> ScalarKind {
        if float_bits == 32 && int_bits <= 16 {
            Self::Float32
        } else {
            Self::Float64
        }
    }

    fn signed_with_unsigned(signed_bits: usize, unsigned_bits: usize) -> ScalarKind {
        let bits = signed_bits.max(unsigned_bits * 2);
        if bits > 64 {
            Self::Float64
        } else {
            Self::signed_of_bits(bits)
        }
    }

    /// NumPy array-interface type string, e.g. `<f4`.
    pub fn typestr(&self) -> &'static str {
        match self {
            Self::Bool => "|b1",
            Self::Int8 => "|i1",
            Self::Int16 => "<i2",
            Self::Int32 => "<i4",
            Self::Int64 => "<i8",
            Self::UInt8 => "|u1",
            Self::UInt16 => "<u2",
            Self::UInt32 => "<u4",
            Self::UInt64 => "<u8",
            Self::Float32 => "<f4",
            Self::Float64 => "<f8",
        }
    }

    fn from_typestr(s: &str) -> Option<Self> {
        let body = s.trim_start_matches(['<', '|', '=']);
        let kind = match body {
            "b1" | "?" | "bool" => Self::Bool,
            "i1" | "int8" => Self::Int8,
            "i2" | "int16" => Self::Int16,
            "i4" | "int32" => Self::Int32,
            "i8" | "int64" => Self::Int64,
            "u1" | "uint8" => Self::UInt8,
            "u2" | "uint16" => Self::UInt16,
            "u4" | "uint32" => Self::UInt32,
            "u8" | "uint64" => Self::UInt64,
            "f4" | "float32" => Self::Float32,
            "f8" | "float64" => Self::Float64,
            _ => return None,
        };
        Some(kind)
    }
}

//==================================================================================
// 2. Full DType (scalar, byte string, structured)
//==================================================================================

/// One named member of a structured dtype.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub dtype: DType,
    /// Byte offset of the field inside one record.
    pub offset: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum DType {
    Scalar(ScalarKind),
    /// Fixed-width raw bytes (NumPy `S<n>`).
    Bytes(usize),
    /// Packed record; fields are laid out back to back in declaration order.
    Struct(Vec<Field>),
}

impl DType {
    /// Builds a packed structured dtype from `(name, dtype)` pairs.
    pub fn structured(fields: Vec<(&str, DType)>) -> Result<DType> {
        if fields.is_empty() {
            return Err(TambakError::DTypeMismatch(
                "structured dtype needs at least one field".into(),
            ));
        }
        let mut offset = 0;
        let mut out: Vec<Field> = Vec::with_capacity(fields.len());
        for (name, dtype) in fields {
            if out.iter().any(|f| f.name == name) {
                return Err(TambakError::DTypeMismatch(format!(
                    "duplicate field name '{}'",
                    name
                )));
            }
            let size = dtype.itemsize();
            out.push(Field {
                name: name.to_string(),
                dtype,
                offset,
            });
            offset += size;
        }
        Ok(DType::Struct(out))
    }

    pub fn itemsize(&self) -> usize {
        match self {
            DType::Scalar(kind) => kind.itemsize(),
            DType::Bytes(n) => *n,
            DType::Struct(fields) => fields
                .iter()
                .map(|f| f.offset + f.dtype.itemsize())
                .max()
                .unwrap_or(0),
        }
    }

    /// The scalar kind, if this dtype can take part in arithmetic.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            DType::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn fields(&self) -> &[Field] {
        match self {
            DType::Struct(fields) => fields,
            _ => &[],
        }
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields()
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| {
                TambakError::DTypeMismatch(format!("dtype {} has no field '{}'", self, name))
            })
    }

    /// The string descriptor stored under the `dtype` metadata key.
    pub fn descriptor(&self) -> String {
        match self {
            DType::Scalar(kind) => kind.typestr().to_string(),
            DType::Bytes(n) => format!("|S{}", n),
            DType::Struct(fields) => {
                let pairs: Vec<(String, String)> = fields
                    .iter()
                    .map(|f| (f.name.clone(), f.dtype.descriptor()))
                    .collect();
                // Serializing a Vec of string pairs cannot fail.
                serde_json::to_string(&pairs).unwrap_or_default()
            }
        }
    }

    /// Parses a descriptor produced by [`DType::descriptor`]. A few NumPy
    /// spellings (`int64`, `f8`, `S8`) are accepted as well.
    pub fn from_descriptor(descriptor: &str) -> Result<DType> {
        let trimmed = descriptor.trim();
        if trimmed.starts_with('[') {
            let pairs: Vec<(String, String)> = serde_json::from_str(trimmed).map_err(|e| {
                TambakError::DTypeMismatch(format!(
                    "malformed structured descriptor '{}': {}",
                    trimmed, e
                ))
            })?;
            let parsed = pairs
                .iter()
                .map(|(name, desc)| Ok((name.as_str(), DType::from_descriptor(desc)?)))
                .collect::<Result<Vec<_>>>()?;
            return DType::structured(parsed);
        }
        if let Some(kind) = ScalarKind::from_typestr(trimmed) {
            return Ok(DType::Scalar(kind));
        }
        let body = trimmed.trim_start_matches(['<', '|', '=']);
        if let Some(width) = body.strip_prefix('S') {
            if let Ok(n) = width.parse::<usize>() {
                if n > 0 {
                    return Ok(DType::Bytes(n));
                }
            }
        }
        Err(TambakError::DTypeMismatch(format!(
            "unrecognized dtype descriptor '{}'",
            descriptor
        )))
    }
}

impl From<ScalarKind> for DType {
    fn from(kind: ScalarKind) -> Self {
        DType::Scalar(kind)
    }
}

/// Provides the canonical string representation (the descriptor).
impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor())
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
