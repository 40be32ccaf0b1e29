//! Device-resident array handles.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::device::{Buffer, BufferId, Device, Operation};
use crate::ops::launch_on;

use super::{ArraySpec, DType, HostData, Scalar, Shape, Tensor};

/// Handle to a buffer on a [`Device`].
///
/// Cloning the handle shares the buffer. Operations enqueue kernels on the current stream of the
/// array's device and return immediately; reading back with [`DeviceArray::to_host`] waits for the
/// stream to drain.
#[derive(Clone)]
pub struct DeviceArray {
    device: Device,
    buffer: Arc<Buffer>,
}

impl DeviceArray {
    pub(crate) fn from_parts(device: Device, buffer: Arc<Buffer>) -> Self {
        DeviceArray { device, buffer }
    }

    /// Uploads a host tensor. Inside a capture the upload is recorded as a literal kernel.
    pub fn from_host(device: &Device, tensor: &Tensor) -> Result<Self> {
        launch_on(
            device,
            Operation::Literal(Arc::new(tensor.data().clone())),
            &[],
            tensor.spec().clone(),
        )
    }

    pub fn from_f32(device: &Device, shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self> {
        DeviceArray::from_host(device, &Tensor::from_f32(shape, data)?)
    }

    pub fn from_f64(device: &Device, shape: impl Into<Shape>, data: Vec<f64>) -> Result<Self> {
        DeviceArray::from_host(device, &Tensor::from_f64(shape, data)?)
    }

    pub fn from_i32(device: &Device, shape: impl Into<Shape>, data: Vec<i32>) -> Result<Self> {
        DeviceArray::from_host(device, &Tensor::from_i32(shape, data)?)
    }

    pub fn from_i64(device: &Device, shape: impl Into<Shape>, data: Vec<i64>) -> Result<Self> {
        DeviceArray::from_host(device, &Tensor::from_i64(shape, data)?)
    }

    pub fn from_bool(device: &Device, shape: impl Into<Shape>, data: Vec<bool>) -> Result<Self> {
        DeviceArray::from_host(device, &Tensor::from_bool(shape, data)?)
    }

    /// Array of `dtype` with every element set to `value`.
    pub fn full(
        device: &Device,
        shape: impl Into<Shape>,
        dtype: DType,
        value: impl Into<Scalar>,
    ) -> Result<Self> {
        launch_on(
            device,
            Operation::Fill(value.into()),
            &[],
            ArraySpec::new(shape, dtype),
        )
    }

    pub fn zeros(device: &Device, shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        DeviceArray::full(device, shape, dtype, Scalar::Int(0))
    }

    pub fn ones(device: &Device, shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        DeviceArray::full(device, shape, dtype, Scalar::Int(1))
    }

    /// Zero-dimensional array.
    pub fn scalar(device: &Device, dtype: DType, value: impl Into<Scalar>) -> Result<Self> {
        DeviceArray::full(device, Shape::scalar(), dtype, value)
    }

    /// `[0, 1, .., len - 1]` as `dtype`.
    pub fn arange(device: &Device, len: usize, dtype: DType) -> Result<Self> {
        let data = HostData::from_i64_iter(dtype, (0..len).map(|value| value as i64));
        DeviceArray::from_host(device, &Tensor::new([len], data)?)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer.id()
    }

    pub fn spec(&self) -> &ArraySpec {
        self.buffer.spec()
    }

    pub fn shape(&self) -> &Shape {
        &self.buffer.spec().shape
    }

    pub fn dims(&self) -> &[usize] {
        self.buffer.spec().shape.dims()
    }

    pub fn dtype(&self) -> DType {
        self.buffer.spec().dtype
    }

    pub fn rank(&self) -> usize {
        self.shape().rank()
    }

    pub fn len(&self) -> usize {
        self.buffer.spec().num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same device buffer.
    pub fn same_buffer(&self, other: &DeviceArray) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Waits for the current stream and copies the buffer contents to the host.
    ///
    /// Fails with `GraphError::SyncDuringCapture` when the current stream is capturing, and with
    /// `GraphError::DeviceFault` when an earlier kernel failed.
    pub fn to_host(&self) -> Result<Tensor> {
        self.device.current_stream().synchronize()?;
        let data = self.buffer.read().clone();
        Tensor::new(self.shape().clone(), data)
    }

    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        Ok(self.to_host()?.to_f64_vec())
    }

    pub fn to_i64_vec(&self) -> Result<Vec<i64>> {
        Ok(self.to_host()?.to_i64_vec())
    }

    pub fn item_f64(&self) -> Result<f64> {
        self.to_host()?.item_f64()
    }

    /// Synchronous truthiness readback of a one-element array.
    pub fn item_bool(&self) -> Result<bool> {
        self.to_host()?.item_bool()
    }
}

impl fmt::Debug for DeviceArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray")
            .field("buffer", &self.buffer.id())
            .field("spec", &self.spec().to_string())
            .field("device", &self.device.id())
            .finish()
    }
}
