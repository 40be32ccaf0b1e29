#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use devgraph::capture_settings::set_blas_capture_allowed;
use devgraph::{
    CapturingConverter, ConverterOptions, DType, Device, DeviceArray, GraphError, MockConverter,
};
use devgraph_backend_ref_cpu::{cpu_device, CpuBackend};

pub fn device() -> Device {
    cpu_device().expect("cpu device")
}

/// Device whose backend cannot record conditional or while nodes.
pub fn legacy_device() -> Device {
    Device::new(CpuBackend::new().without_conditional_nodes()).expect("cpu device")
}

pub fn capturing(device: &Device) -> CapturingConverter {
    CapturingConverter::with_options(device, ConverterOptions::default()).expect("converter")
}

pub fn mock(device: &Device) -> MockConverter {
    MockConverter::new(device)
}

pub fn f64s(device: &Device, values: &[f64]) -> DeviceArray {
    DeviceArray::from_f64(device, [values.len()], values.to_vec()).expect("upload")
}

pub fn i64_scalar(device: &Device, value: i64) -> DeviceArray {
    DeviceArray::scalar(device, DType::I64, value).expect("upload")
}

pub fn f64_scalar(device: &Device, value: f64) -> DeviceArray {
    DeviceArray::scalar(device, DType::F64, value).expect("upload")
}

pub fn host(array: &DeviceArray) -> Vec<f64> {
    array.to_f64_vec().expect("readback")
}

pub fn hosts(arrays: &[DeviceArray]) -> Vec<Vec<f64>> {
    arrays.iter().map(host).collect()
}

pub fn graph_error(result: Result<impl std::fmt::Debug>) -> GraphError {
    match result {
        Ok(value) => panic!("expected a GraphError, got Ok({value:?})"),
        Err(err) => match err.downcast_ref::<GraphError>() {
            Some(graph_error) => graph_error.clone(),
            None => panic!("expected a GraphError, got {err:#}"),
        },
    }
}

static BLAS_FLAG: Mutex<()> = Mutex::new(());

/// Serialises tests that flip the process-wide BLAS capture flag and restores it on drop.
pub struct BlasCaptureGuard {
    previous: bool,
    _lock: MutexGuard<'static, ()>,
}

impl BlasCaptureGuard {
    pub fn set(allowed: bool) -> Self {
        let lock = BLAS_FLAG.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = set_blas_capture_allowed(allowed);
        BlasCaptureGuard {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for BlasCaptureGuard {
    fn drop(&mut self) {
        set_blas_capture_allowed(self.previous);
    }
}
