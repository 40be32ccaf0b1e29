//! Enumerates the scalar element types supported by device arrays.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Scalar;

/// Logical dtype identifier shared between host tensors and device buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    /// Boolean stored one value per element.
    Bool,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer, the accumulation type of integer reductions.
    I64,
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point following IEEE-754 semantics.
    F64,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool => 1,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DType::I32 | DType::I64)
    }

    pub fn is_bool(self) -> bool {
        matches!(self, DType::Bool)
    }

    /// Returns the lowercase name used in text dumps and error messages.
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Result dtype of a binary operation between two arrays.
    ///
    /// Follows the usual lattice `bool < i32 < i64 < f32 < f64`, except that mixing an integer
    /// with `f32` widens to `f64` so no integer value loses precision.
    pub fn promote(self, other: DType) -> DType {
        match (self, other) {
            (a, b) if a == b => a,
            (DType::I32 | DType::I64, DType::F32) | (DType::F32, DType::I32 | DType::I64) => {
                DType::F64
            }
            (a, b) => a.max(b),
        }
    }

    /// Result dtype when an array of this dtype meets a host scalar.
    ///
    /// Scalars are weakly typed: they never widen an array within the same kind, but a float
    /// scalar lifts an integer or boolean array to `f64`.
    pub fn promote_scalar(self, scalar: &Scalar) -> DType {
        match scalar {
            Scalar::Float(_) if !self.is_float() => DType::F64,
            Scalar::Int(_) if self.is_bool() => DType::I64,
            _ => self,
        }
    }

    /// Floating dtype used by transcendental ops and true division.
    pub fn to_float(self) -> DType {
        match self {
            DType::F32 => DType::F32,
            _ => DType::F64,
        }
    }

    /// Accumulation dtype used by sums and matrix products.
    pub fn accumulator(self) -> DType {
        match self {
            DType::Bool | DType::I32 | DType::I64 => DType::I64,
            other => other,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
