//! Dense linear algebra. `matmul` and the full `norm` are BLAS-backed and only capturable when
//! the BLAS capture flag is enabled.

use anyhow::{bail, Result};

use crate::device::Operation;
use crate::tensor::{ArraySpec, DeviceArray, Shape};

use super::launch;

fn matmul_shape(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    let (l, r) = (lhs.dims(), rhs.dims());
    let shape = match (l, r) {
        ([m, k], [k2, n]) if k == k2 => Shape::new([*m, *n]),
        ([m, k], [k2]) if k == k2 => Shape::new([*m]),
        ([k], [k2, n]) if k == k2 => Shape::new([*n]),
        ([k], [k2]) if k == k2 => Shape::scalar(),
        _ => bail!("matmul shapes {lhs} and {rhs} are not aligned"),
    };
    Ok(shape)
}

impl DeviceArray {
    /// Matrix product of rank-1/rank-2 operands.
    pub fn matmul(&self, other: &DeviceArray) -> Result<DeviceArray> {
        if self.dtype().is_bool() || other.dtype().is_bool() {
            bail!("matmul does not accept bool operands");
        }
        let shape = matmul_shape(self.shape(), other.shape())?;
        let dtype = self.dtype().promote(other.dtype());
        launch(Operation::MatMul, &[self, other], ArraySpec::new(shape, dtype))
    }

    /// Euclidean norm over all elements, as a zero-dimensional float array.
    pub fn norm(&self) -> Result<DeviceArray> {
        launch(
            Operation::Norm { axis: None },
            &[self],
            ArraySpec::scalar(self.dtype().to_float()),
        )
    }

    /// Euclidean norm along `axis`.
    pub fn norm_axis(&self, axis: usize) -> Result<DeviceArray> {
        let shape = self.shape().without_axis(axis)?;
        launch(
            Operation::Norm { axis: Some(axis) },
            &[self],
            ArraySpec::new(shape, self.dtype().to_float()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_shapes_follow_operand_ranks() -> Result<()> {
        assert_eq!(
            matmul_shape(&Shape::new([2, 3]), &Shape::new([3, 4]))?,
            Shape::new([2, 4])
        );
        assert_eq!(
            matmul_shape(&Shape::new([2, 3]), &Shape::new([3]))?,
            Shape::new([2])
        );
        assert_eq!(
            matmul_shape(&Shape::new([3]), &Shape::new([3]))?,
            Shape::scalar()
        );
        assert!(matmul_shape(&Shape::new([2, 3]), &Shape::new([2, 3])).is_err());
        Ok(())
    }
}
