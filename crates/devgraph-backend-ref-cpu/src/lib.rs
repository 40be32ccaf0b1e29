pub mod cpu;

use anyhow::Result;
use devgraph::Device;

pub use cpu::{CpuBackend, CpuKernelInterceptor, GenericCpuBackend, NoopInterceptor};

/// Creates a device backed by the reference CPU executor.
pub fn cpu_device() -> Result<Device> {
    Device::new(CpuBackend::new())
}
