use std::fmt;

use serde::{Deserialize, Serialize};

use super::{DType, Shape};

/// Static description of a device buffer: its shape and element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArraySpec {
    pub shape: Shape,
    pub dtype: DType,
}

impl ArraySpec {
    pub fn new(shape: impl Into<Shape>, dtype: DType) -> Self {
        ArraySpec {
            shape: shape.into(),
            dtype,
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        ArraySpec {
            shape: Shape::scalar(),
            dtype,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        ArraySpec {
            shape: self.shape.clone(),
            dtype,
        }
    }
}

impl fmt::Display for ArraySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}
