//! Lightweight wrapper for array shapes and dimension bookkeeping.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Stores the logical dimensions of an array. Rank 0 denotes a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Constructs a new shape from the provided dimensions.
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    /// Shape of a zero-dimensional array holding exactly one element.
    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Numpy broadcasting: dimensions are aligned from the right and each pair must either
    /// match or contain a `1`.
    pub fn broadcast(&self, other: &Shape) -> Result<Shape> {
        let rank = self.rank().max(other.rank());
        let mut dims = vec![0usize; rank];
        for (axis, dim) in dims.iter_mut().enumerate() {
            let lhs = aligned_dim(&self.dims, rank, axis);
            let rhs = aligned_dim(&other.dims, rank, axis);
            *dim = match (lhs, rhs) {
                (a, b) if a == b => a,
                (1, b) => b,
                (a, 1) => a,
                (a, b) => bail!("cannot broadcast shapes {self} and {other} (axis {axis}: {a} vs {b})"),
            };
        }
        Ok(Shape { dims })
    }

    /// Returns `true` when an array of this shape can be broadcast to `target` without
    /// changing `target`.
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        matches!(self.broadcast(target), Ok(shape) if shape == *target)
    }

    /// Drops `axis`, as done by axis reductions.
    pub fn without_axis(&self, axis: usize) -> Result<Shape> {
        if axis >= self.rank() {
            bail!("axis {axis} out of range for shape {self}");
        }
        let mut dims = self.dims.clone();
        dims.remove(axis);
        Ok(Shape { dims })
    }
}

fn aligned_dim(dims: &[usize], rank: usize, axis: usize) -> usize {
    let offset = rank - dims.len();
    if axis < offset {
        1
    } else {
        dims[axis - offset]
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dims.is_empty() {
            return f.write_str("[]");
        }
        let dims = self
            .dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("x");
        write!(f, "[{dims}]")
    }
}
