//! Host-backed buffers used for uploads, readback, and kernel evaluation.

use anyhow::{bail, ensure, Result};

use super::{ArraySpec, DType, Scalar, Shape};

/// Typed element storage. Device buffers and host tensors share this representation.
#[derive(Debug, Clone, PartialEq)]
pub enum HostData {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl HostData {
    /// Returns zero-initialised storage of `len` elements.
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::Bool => HostData::Bool(vec![false; len]),
            DType::I32 => HostData::I32(vec![0; len]),
            DType::I64 => HostData::I64(vec![0; len]),
            DType::F32 => HostData::F32(vec![0.0; len]),
            DType::F64 => HostData::F64(vec![0.0; len]),
        }
    }

    /// Returns storage of `len` elements all set to `value` converted to `dtype`.
    pub fn filled(dtype: DType, len: usize, value: Scalar) -> Self {
        match dtype {
            DType::Bool => HostData::Bool(vec![value.is_truthy(); len]),
            DType::I32 => HostData::I32(vec![value.as_i64() as i32; len]),
            DType::I64 => HostData::I64(vec![value.as_i64(); len]),
            DType::F32 => HostData::F32(vec![value.as_f64() as f32; len]),
            DType::F64 => HostData::F64(vec![value.as_f64(); len]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            HostData::Bool(_) => DType::Bool,
            HostData::I32(_) => DType::I32,
            HostData::I64(_) => DType::I64,
            HostData::F32(_) => DType::F32,
            HostData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HostData::Bool(v) => v.len(),
            HostData::I32(v) => v.len(),
            HostData::I64(v) => v.len(),
            HostData::F32(v) => v.len(),
            HostData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads element `index` widened to `f64`.
    pub fn get_f64(&self, index: usize) -> f64 {
        match self {
            HostData::Bool(v) => f64::from(u8::from(v[index])),
            HostData::I32(v) => f64::from(v[index]),
            HostData::I64(v) => v[index] as f64,
            HostData::F32(v) => f64::from(v[index]),
            HostData::F64(v) => v[index],
        }
    }

    /// Reads element `index` converted to `i64` (floats truncate toward zero).
    pub fn get_i64(&self, index: usize) -> i64 {
        match self {
            HostData::Bool(v) => i64::from(v[index]),
            HostData::I32(v) => i64::from(v[index]),
            HostData::I64(v) => v[index],
            HostData::F32(v) => v[index] as i64,
            HostData::F64(v) => v[index] as i64,
        }
    }

    /// Non-zero test used for predicates and logical ops.
    pub fn is_truthy(&self, index: usize) -> bool {
        match self {
            HostData::Bool(v) => v[index],
            HostData::I32(v) => v[index] != 0,
            HostData::I64(v) => v[index] != 0,
            HostData::F32(v) => v[index] != 0.0,
            HostData::F64(v) => v[index] != 0.0,
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.get_f64(i)).collect()
    }

    pub fn to_i64_vec(&self) -> Vec<i64> {
        (0..self.len()).map(|i| self.get_i64(i)).collect()
    }

    /// Builds storage of `dtype` from `f64` values, rounding or truncating as the dtype requires.
    pub fn from_f64_iter<I: IntoIterator<Item = f64>>(dtype: DType, values: I) -> Self {
        let values = values.into_iter();
        match dtype {
            DType::Bool => HostData::Bool(values.map(|v| v != 0.0).collect()),
            DType::I32 => HostData::I32(values.map(|v| v as i32).collect()),
            DType::I64 => HostData::I64(values.map(|v| v as i64).collect()),
            DType::F32 => HostData::F32(values.map(|v| v as f32).collect()),
            DType::F64 => HostData::F64(values.collect()),
        }
    }

    /// Builds storage of `dtype` from `i64` values; narrowing to `i32` wraps.
    pub fn from_i64_iter<I: IntoIterator<Item = i64>>(dtype: DType, values: I) -> Self {
        let values = values.into_iter();
        match dtype {
            DType::Bool => HostData::Bool(values.map(|v| v != 0).collect()),
            DType::I32 => HostData::I32(values.map(|v| v as i32).collect()),
            DType::I64 => HostData::I64(values.collect()),
            DType::F32 => HostData::F32(values.map(|v| v as f32).collect()),
            DType::F64 => HostData::F64(values.map(|v| v as f64).collect()),
        }
    }

    /// Converts the storage to another dtype.
    pub fn cast(&self, dtype: DType) -> HostData {
        if self.dtype() == dtype {
            return self.clone();
        }
        match self {
            HostData::Bool(v) => HostData::from_i64_iter(dtype, v.iter().map(|&b| i64::from(b))),
            HostData::I32(v) => HostData::from_i64_iter(dtype, v.iter().map(|&x| i64::from(x))),
            HostData::I64(v) => HostData::from_i64_iter(dtype, v.iter().copied()),
            HostData::F32(v) => HostData::from_f64_iter(dtype, v.iter().map(|&x| f64::from(x))),
            HostData::F64(v) => HostData::from_f64_iter(dtype, v.iter().copied()),
        }
    }

    /// Gathers elements by index into a new buffer of the same dtype.
    pub fn gather(&self, indices: &[usize]) -> HostData {
        match self {
            HostData::Bool(v) => HostData::Bool(indices.iter().map(|&i| v[i]).collect()),
            HostData::I32(v) => HostData::I32(indices.iter().map(|&i| v[i]).collect()),
            HostData::I64(v) => HostData::I64(indices.iter().map(|&i| v[i]).collect()),
            HostData::F32(v) => HostData::F32(indices.iter().map(|&i| v[i]).collect()),
            HostData::F64(v) => HostData::F64(indices.iter().map(|&i| v[i]).collect()),
        }
    }
}

/// Simple host-backed array used for uploads, readback and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    spec: ArraySpec,
    data: HostData,
}

impl Tensor {
    /// Wraps existing storage, validating the element count against `shape`.
    pub fn new(shape: impl Into<Shape>, data: HostData) -> Result<Self> {
        let shape = shape.into();
        ensure!(
            data.len() == shape.num_elements(),
            "tensor data length ({}) does not match shape {}",
            data.len(),
            shape
        );
        Ok(Tensor {
            spec: ArraySpec::new(shape, data.dtype()),
            data,
        })
    }

    pub fn from_f32(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self> {
        Tensor::new(shape, HostData::F32(data))
    }

    pub fn from_f64(shape: impl Into<Shape>, data: Vec<f64>) -> Result<Self> {
        Tensor::new(shape, HostData::F64(data))
    }

    pub fn from_i32(shape: impl Into<Shape>, data: Vec<i32>) -> Result<Self> {
        Tensor::new(shape, HostData::I32(data))
    }

    pub fn from_i64(shape: impl Into<Shape>, data: Vec<i64>) -> Result<Self> {
        Tensor::new(shape, HostData::I64(data))
    }

    pub fn from_bool(shape: impl Into<Shape>, data: Vec<bool>) -> Result<Self> {
        Tensor::new(shape, HostData::Bool(data))
    }

    /// Zero-dimensional tensor holding `value` as `dtype`.
    pub fn scalar(dtype: DType, value: impl Into<Scalar>) -> Self {
        Tensor {
            spec: ArraySpec::scalar(dtype),
            data: HostData::filled(dtype, 1, value.into()),
        }
    }

    pub fn spec(&self) -> &ArraySpec {
        &self.spec
    }

    pub fn shape(&self) -> &Shape {
        &self.spec.shape
    }

    pub fn dtype(&self) -> DType {
        self.spec.dtype
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &HostData {
        &self.data
    }

    pub fn into_data(self) -> HostData {
        self.data
    }

    pub fn as_f32(&self) -> Result<&[f32]> {
        match &self.data {
            HostData::F32(v) => Ok(v),
            other => bail!("tensor data is {} not f32", other.dtype()),
        }
    }

    pub fn as_f64(&self) -> Result<&[f64]> {
        match &self.data {
            HostData::F64(v) => Ok(v),
            other => bail!("tensor data is {} not f64", other.dtype()),
        }
    }

    pub fn as_i32(&self) -> Result<&[i32]> {
        match &self.data {
            HostData::I32(v) => Ok(v),
            other => bail!("tensor data is {} not i32", other.dtype()),
        }
    }

    pub fn as_i64(&self) -> Result<&[i64]> {
        match &self.data {
            HostData::I64(v) => Ok(v),
            other => bail!("tensor data is {} not i64", other.dtype()),
        }
    }

    pub fn as_bool(&self) -> Result<&[bool]> {
        match &self.data {
            HostData::Bool(v) => Ok(v),
            other => bail!("tensor data is {} not bool", other.dtype()),
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.data.to_f64_vec()
    }

    pub fn to_i64_vec(&self) -> Vec<i64> {
        self.data.to_i64_vec()
    }

    /// Returns the single element of a one-element tensor as `f64`.
    pub fn item_f64(&self) -> Result<f64> {
        ensure!(
            self.len() == 1,
            "item() requires exactly one element, tensor has {}",
            self.len()
        );
        Ok(self.data.get_f64(0))
    }

    /// Returns the truthiness of a one-element tensor.
    pub fn item_bool(&self) -> Result<bool> {
        ensure!(
            self.len() == 1,
            "item() requires exactly one element, tensor has {}",
            self.len()
        );
        Ok(self.data.is_truthy(0))
    }
}
