use anyhow::{bail, Result};

use crate::device::{ArgReduceOp, Operation, ReduceOp};
use crate::tensor::{ArraySpec, DType, DeviceArray, Shape};

use super::launch;

fn reduced_shape(array: &DeviceArray, axis: Option<usize>) -> Result<Shape> {
    match axis {
        None => Ok(Shape::scalar()),
        Some(axis) => array.shape().without_axis(axis),
    }
}

fn reduce_dtype(op: ReduceOp, dtype: DType) -> DType {
    match op {
        ReduceOp::Sum => dtype.accumulator(),
        ReduceOp::Max | ReduceOp::Min => dtype,
        ReduceOp::All | ReduceOp::Any => DType::Bool,
        ReduceOp::CountNonzero => DType::I64,
        ReduceOp::Mean => dtype.to_float(),
    }
}

impl DeviceArray {
    /// Reduction over all elements (`axis == None`) or a single axis.
    pub fn reduce(&self, op: ReduceOp, axis: Option<usize>) -> Result<DeviceArray> {
        let shape = reduced_shape(self, axis)?;
        if matches!(op, ReduceOp::Max | ReduceOp::Min) {
            let extent = axis.map_or(self.len(), |axis| self.dims()[axis]);
            if extent == 0 {
                bail!("{op:?} of an empty extent is undefined");
            }
        }
        launch(
            Operation::Reduce { op, axis },
            &[self],
            ArraySpec::new(shape, reduce_dtype(op, self.dtype())),
        )
    }

    pub fn sum(&self) -> Result<DeviceArray> {
        self.reduce(ReduceOp::Sum, None)
    }

    pub fn sum_axis(&self, axis: usize) -> Result<DeviceArray> {
        self.reduce(ReduceOp::Sum, Some(axis))
    }

    pub fn max(&self) -> Result<DeviceArray> {
        self.reduce(ReduceOp::Max, None)
    }

    pub fn min(&self) -> Result<DeviceArray> {
        self.reduce(ReduceOp::Min, None)
    }

    pub fn mean(&self) -> Result<DeviceArray> {
        self.reduce(ReduceOp::Mean, None)
    }

    /// Boolean scalar: every element is non-zero.
    pub fn all(&self) -> Result<DeviceArray> {
        self.reduce(ReduceOp::All, None)
    }

    /// Boolean scalar: at least one element is non-zero.
    pub fn any(&self) -> Result<DeviceArray> {
        self.reduce(ReduceOp::Any, None)
    }

    pub fn count_nonzero(&self, axis: Option<usize>) -> Result<DeviceArray> {
        self.reduce(ReduceOp::CountNonzero, axis)
    }

    fn arg_reduce(&self, op: ArgReduceOp, axis: Option<usize>) -> Result<DeviceArray> {
        let shape = reduced_shape(self, axis)?;
        let extent = axis.map_or(self.len(), |axis| self.dims()[axis]);
        if extent == 0 {
            bail!("{op:?} of an empty extent is undefined");
        }
        launch(
            Operation::ArgReduce { op, axis },
            &[self],
            ArraySpec::new(shape, DType::I64),
        )
    }

    /// Index of the first minimum, flat when `axis` is `None`.
    pub fn argmin(&self, axis: Option<usize>) -> Result<DeviceArray> {
        self.arg_reduce(ArgReduceOp::ArgMin, axis)
    }

    /// Index of the first maximum, flat when `axis` is `None`.
    pub fn argmax(&self, axis: Option<usize>) -> Result<DeviceArray> {
        self.arg_reduce(ArgReduceOp::ArgMax, axis)
    }
}
