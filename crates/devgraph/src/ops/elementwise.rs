//! Elementwise arithmetic, comparisons, selection, casts and copies.

use anyhow::{bail, Result};

use crate::device::{BinaryOp, CompareOp, Operation, UnaryOp};
use crate::tensor::{ArraySpec, DType, DeviceArray, Scalar, Shape};

use super::{launch, launch_into};

fn binary_dtype(op: BinaryOp, promoted: DType) -> DType {
    match op {
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr => DType::Bool,
        BinaryOp::Div => promoted.to_float(),
        _ => promoted,
    }
}

fn unary_dtype(op: UnaryOp, dtype: DType) -> Result<DType> {
    Ok(match op {
        UnaryOp::Neg if dtype.is_bool() => bail!("negation is not defined for bool arrays"),
        UnaryOp::Neg | UnaryOp::Abs | UnaryOp::Floor => dtype,
        UnaryOp::Sqrt | UnaryOp::Exp | UnaryOp::Log | UnaryOp::Sin | UnaryOp::Cos => {
            dtype.to_float()
        }
        UnaryOp::Not => DType::Bool,
    })
}

impl DeviceArray {
    fn binary(&self, other: &DeviceArray, op: BinaryOp) -> Result<DeviceArray> {
        let shape = self.shape().broadcast(other.shape())?;
        let dtype = binary_dtype(op, self.dtype().promote(other.dtype()));
        launch(Operation::Binary(op), &[self, other], ArraySpec::new(shape, dtype))
    }

    fn binary_scalar(&self, scalar: Scalar, op: BinaryOp, reversed: bool) -> Result<DeviceArray> {
        let dtype = binary_dtype(op, self.dtype().promote_scalar(&scalar));
        launch(
            Operation::BinaryScalar {
                op,
                scalar,
                reversed,
            },
            &[self],
            ArraySpec::new(self.shape().clone(), dtype),
        )
    }

    fn unary(&self, op: UnaryOp) -> Result<DeviceArray> {
        let dtype = unary_dtype(op, self.dtype())?;
        launch(
            Operation::Unary(op),
            &[self],
            ArraySpec::new(self.shape().clone(), dtype),
        )
    }

    fn compare(&self, other: &DeviceArray, op: CompareOp) -> Result<DeviceArray> {
        let shape = self.shape().broadcast(other.shape())?;
        launch(
            Operation::Compare(op),
            &[self, other],
            ArraySpec::new(shape, DType::Bool),
        )
    }

    fn compare_scalar(&self, scalar: Scalar, op: CompareOp) -> Result<DeviceArray> {
        launch(
            Operation::CompareScalar { op, scalar },
            &[self],
            ArraySpec::new(self.shape().clone(), DType::Bool),
        )
    }

    pub fn add(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.binary(other, BinaryOp::Add)
    }

    pub fn sub(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.binary(other, BinaryOp::Sub)
    }

    pub fn mul(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.binary(other, BinaryOp::Mul)
    }

    /// True division; integer inputs produce `f64`.
    pub fn div(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.binary(other, BinaryOp::Div)
    }

    pub fn maximum(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.binary(other, BinaryOp::Maximum)
    }

    pub fn minimum(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.binary(other, BinaryOp::Minimum)
    }

    pub fn pow(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.binary(other, BinaryOp::Pow)
    }

    pub fn logical_and(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.binary(other, BinaryOp::LogicalAnd)
    }

    pub fn logical_or(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.binary(other, BinaryOp::LogicalOr)
    }

    pub fn add_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.binary_scalar(value.into(), BinaryOp::Add, false)
    }

    pub fn sub_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.binary_scalar(value.into(), BinaryOp::Sub, false)
    }

    /// `value - self`.
    pub fn rsub_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.binary_scalar(value.into(), BinaryOp::Sub, true)
    }

    pub fn mul_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.binary_scalar(value.into(), BinaryOp::Mul, false)
    }

    pub fn div_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.binary_scalar(value.into(), BinaryOp::Div, false)
    }

    /// `value / self`.
    pub fn rdiv_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.binary_scalar(value.into(), BinaryOp::Div, true)
    }

    pub fn pow_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.binary_scalar(value.into(), BinaryOp::Pow, false)
    }

    pub fn maximum_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.binary_scalar(value.into(), BinaryOp::Maximum, false)
    }

    pub fn minimum_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.binary_scalar(value.into(), BinaryOp::Minimum, false)
    }

    pub fn neg(&self) -> Result<DeviceArray> {
        self.unary(UnaryOp::Neg)
    }

    pub fn abs(&self) -> Result<DeviceArray> {
        self.unary(UnaryOp::Abs)
    }

    pub fn sqrt(&self) -> Result<DeviceArray> {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn exp(&self) -> Result<DeviceArray> {
        self.unary(UnaryOp::Exp)
    }

    pub fn log(&self) -> Result<DeviceArray> {
        self.unary(UnaryOp::Log)
    }

    pub fn floor(&self) -> Result<DeviceArray> {
        self.unary(UnaryOp::Floor)
    }

    pub fn sin(&self) -> Result<DeviceArray> {
        self.unary(UnaryOp::Sin)
    }

    pub fn cos(&self) -> Result<DeviceArray> {
        self.unary(UnaryOp::Cos)
    }

    pub fn logical_not(&self) -> Result<DeviceArray> {
        self.unary(UnaryOp::Not)
    }

    pub fn eq(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.compare(other, CompareOp::Eq)
    }

    pub fn ne(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.compare(other, CompareOp::Ne)
    }

    pub fn lt(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.compare(other, CompareOp::Lt)
    }

    pub fn le(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.compare(other, CompareOp::Le)
    }

    pub fn gt(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.compare(other, CompareOp::Gt)
    }

    pub fn ge(&self, other: &DeviceArray) -> Result<DeviceArray> {
        self.compare(other, CompareOp::Ge)
    }

    pub fn eq_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.compare_scalar(value.into(), CompareOp::Eq)
    }

    pub fn ne_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.compare_scalar(value.into(), CompareOp::Ne)
    }

    pub fn lt_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.compare_scalar(value.into(), CompareOp::Lt)
    }

    pub fn le_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.compare_scalar(value.into(), CompareOp::Le)
    }

    pub fn gt_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.compare_scalar(value.into(), CompareOp::Gt)
    }

    pub fn ge_scalar(&self, value: impl Into<Scalar>) -> Result<DeviceArray> {
        self.compare_scalar(value.into(), CompareOp::Ge)
    }

    /// `where(condition, on_true, on_false)` with broadcasting over all three operands.
    pub fn select(
        condition: &DeviceArray,
        on_true: &DeviceArray,
        on_false: &DeviceArray,
    ) -> Result<DeviceArray> {
        let shape = condition
            .shape()
            .broadcast(on_true.shape())?
            .broadcast(on_false.shape())?;
        let dtype = on_true.dtype().promote(on_false.dtype());
        launch(
            Operation::Select,
            &[condition, on_true, on_false],
            ArraySpec::new(shape, dtype),
        )
    }

    /// Fresh copy of the array in a new buffer.
    pub fn copy(&self) -> Result<DeviceArray> {
        launch(Operation::Copy, &[self], self.spec().clone())
    }

    pub fn astype(&self, dtype: DType) -> Result<DeviceArray> {
        launch(
            Operation::Copy,
            &[self],
            ArraySpec::new(self.shape().clone(), dtype),
        )
    }

    pub fn broadcast_to(&self, shape: impl Into<Shape>) -> Result<DeviceArray> {
        let shape = shape.into();
        if !self.shape().broadcasts_to(&shape) {
            bail!("cannot broadcast {} to {}", self.shape(), shape);
        }
        launch(
            Operation::Copy,
            &[self],
            ArraySpec::new(shape, self.dtype()),
        )
    }

    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<DeviceArray> {
        let shape = shape.into();
        if shape.num_elements() != self.len() {
            bail!("cannot reshape {} into {}", self.shape(), shape);
        }
        launch(
            Operation::Reshape,
            &[self],
            ArraySpec::new(shape, self.dtype()),
        )
    }

    /// In-place update: broadcasts and casts `source` into this array's buffer.
    ///
    /// This is the only way to mutate an existing array; conditional bodies use it to publish
    /// their effects.
    pub fn assign(&self, source: &DeviceArray) -> Result<()> {
        if !source.shape().broadcasts_to(self.shape()) {
            bail!("cannot assign {} into {}", source.spec(), self.spec());
        }
        launch_into(Operation::Copy, &[source], self)
    }

    /// In-place fill with a host scalar.
    pub fn fill(&self, value: impl Into<Scalar>) -> Result<()> {
        launch_into(Operation::Fill(value.into()), &[], self)
    }
}
