//! Runs a single kernel against device buffers.

use std::sync::{Arc, RwLockReadGuard};

use smallvec::SmallVec;

use crate::tensor::HostData;

use super::backend::{BackendError, BackendResult, DeviceBackend, HostOperand};
use super::buffer::Buffer;
use super::kernel::Operation;

/// Evaluates `op` over `inputs` and stores the result into `output`.
///
/// Each distinct input buffer is read-locked once; the locks are released before the output is
/// written so in-place updates (`output` also listed as an input) are allowed.
pub(crate) fn execute_kernel(
    backend: &dyn DeviceBackend,
    op: &Operation,
    inputs: &[Arc<Buffer>],
    output: &Buffer,
) -> BackendResult<()> {
    let result = {
        let mut guards: SmallVec<[RwLockReadGuard<'_, HostData>; 4]> = SmallVec::new();
        let mut positions: SmallVec<[usize; 4]> = SmallVec::new();
        for (index, buffer) in inputs.iter().enumerate() {
            match inputs[..index]
                .iter()
                .position(|earlier| earlier.id() == buffer.id())
            {
                Some(first) => positions.push(positions[first]),
                None => {
                    positions.push(guards.len());
                    guards.push(buffer.read());
                }
            }
        }
        let views: SmallVec<[HostOperand<'_>; 4]> = inputs
            .iter()
            .zip(&positions)
            .map(|(buffer, &slot)| HostOperand::new(buffer.spec(), &guards[slot]))
            .collect();
        backend.execute(op, &views, output.spec())?
    };

    let spec = output.spec();
    if result.dtype() != spec.dtype || result.len() != spec.num_elements() {
        return Err(BackendError::execution(format!(
            "{} produced {}x{} but the output buffer is {}",
            op.label(),
            result.dtype(),
            result.len(),
            spec
        )));
    }
    output.store(result);
    Ok(())
}
