//! Array operations. Each call computes the output spec on the host and enqueues one kernel.

mod elementwise;
mod indexing;
mod linalg;
mod reduce;

use anyhow::Result;
use smallvec::SmallVec;

use crate::capture_settings::blas_capture_allowed;
use crate::device::{Buffer, Device, KernelLaunch, Operation};
use crate::error::GraphError;
use crate::tensor::{ArraySpec, DeviceArray};

fn ensure_same_device(device: &Device, inputs: &[&DeviceArray]) -> Result<()> {
    for input in inputs {
        if input.device() != device {
            return Err(GraphError::DeviceMismatch {
                expected: device.id().as_u64(),
                found: input.device().id().as_u64(),
            }
            .into());
        }
    }
    Ok(())
}

fn submit(device: &Device, op: Operation, inputs: &[&DeviceArray], output: &DeviceArray) -> Result<()> {
    ensure_same_device(device, inputs)?;
    let stream = device.current_stream();
    if op.requires_blas() && stream.is_capturing() && !blas_capture_allowed() {
        return Err(GraphError::unsupported(format!(
            "{} uses the BLAS sub-library, which is not allowed to join stream capture \
             (see capture_settings::set_blas_capture_allowed)",
            op.label()
        ))
        .into());
    }
    let inputs: SmallVec<[_; 4]> = inputs.iter().map(|input| input.buffer().clone()).collect();
    stream.enqueue(KernelLaunch {
        op,
        inputs,
        output: output.buffer().clone(),
    })
}

/// Allocates an output of `spec` on `device` and enqueues `op` writing into it.
pub(crate) fn launch_on(
    device: &Device,
    op: Operation,
    inputs: &[&DeviceArray],
    spec: ArraySpec,
) -> Result<DeviceArray> {
    let output = DeviceArray::from_parts(device.clone(), Buffer::allocate(spec));
    submit(device, op, inputs, &output)?;
    Ok(output)
}

/// Launches on the device of the first input.
pub(crate) fn launch(op: Operation, inputs: &[&DeviceArray], spec: ArraySpec) -> Result<DeviceArray> {
    let device = inputs[0].device().clone();
    launch_on(&device, op, inputs, spec)
}

/// Enqueues `op` writing into the existing buffer of `output`.
pub(crate) fn launch_into(op: Operation, inputs: &[&DeviceArray], output: &DeviceArray) -> Result<()> {
    submit(output.device(), op, inputs, output)
}
