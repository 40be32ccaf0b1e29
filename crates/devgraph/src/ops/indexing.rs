use anyhow::{bail, Result};

use crate::device::Operation;
use crate::tensor::{ArraySpec, DeviceArray, Shape};

use super::launch;

impl DeviceArray {
    /// `self[index]` along the leading axis.
    pub fn index(&self, index: usize) -> Result<DeviceArray> {
        let Some((&leading, rest)) = self.dims().split_first() else {
            bail!("cannot index a zero-dimensional array");
        };
        if index >= leading {
            bail!("index {index} out of bounds for leading axis of {}", self.shape());
        }
        launch(
            Operation::Index(index),
            &[self],
            ArraySpec::new(rest.to_vec(), self.dtype()),
        )
    }

    /// Rows selected by an integer index array: the result has shape
    /// `indices.shape + self.shape[1..]`.
    pub fn take(&self, indices: &DeviceArray) -> Result<DeviceArray> {
        if !indices.dtype().is_integer() {
            bail!("take expects integer indices, got {}", indices.dtype());
        }
        let Some((_, rest)) = self.dims().split_first() else {
            bail!("cannot take rows of a zero-dimensional array");
        };
        let mut dims = indices.dims().to_vec();
        dims.extend_from_slice(rest);
        launch(
            Operation::Take,
            &[self, indices],
            ArraySpec::new(Shape::new(dims), self.dtype()),
        )
    }
}
