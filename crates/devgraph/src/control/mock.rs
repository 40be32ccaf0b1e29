use std::sync::Arc;

use anyhow::Result;

use crate::device::Device;
use crate::graph::{CapturedGraph, GraphifyId};
use crate::tensor::DeviceArray;

use super::stats::{StatEvent, StatsCounters};
use super::{check_predicate, validate_branches, Branch, ConverterStats, GraphConverter, LoopState};

/// Eager converter: runs graphified functions directly and evaluates predicates on the host.
///
/// Each predicate read synchronises the current stream, so this converter must not be used
/// from inside a stream capture.
pub struct MockConverter {
    device: Device,
    stats: Arc<StatsCounters>,
}

impl MockConverter {
    pub fn new(device: &Device) -> Self {
        MockConverter::with_stats(device, Arc::new(StatsCounters::default()))
    }

    pub(crate) fn with_stats(device: &Device, stats: Arc<StatsCounters>) -> Self {
        MockConverter {
            device: device.clone(),
            stats,
        }
    }
}

impl GraphConverter for MockConverter {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn invoke(
        &self,
        _id: GraphifyId,
        func: &dyn Fn(&[DeviceArray]) -> Result<Vec<DeviceArray>>,
        args: &[DeviceArray],
    ) -> Result<Vec<DeviceArray>> {
        self.stats.bump(StatEvent::HostInvocation);
        func(args)
    }

    fn release(&self, _id: GraphifyId) {}

    fn captured_graphs(&self, _id: GraphifyId) -> Vec<Arc<CapturedGraph>> {
        Vec::new()
    }

    fn while_loop<C, B, S>(&self, mut cond_fn: C, mut body_fn: B, state: S) -> Result<LoopState>
    where
        C: FnMut(&[DeviceArray]) -> Result<DeviceArray>,
        B: FnMut(&[DeviceArray]) -> Result<Vec<DeviceArray>>,
        S: Into<LoopState>,
    {
        let state = LoopState::owned(state.into())?;
        loop {
            let predicate = cond_fn(&state)?;
            check_predicate(&predicate)?;
            if !predicate.item_bool()? {
                return Ok(state);
            }
            let next = body_fn(&state)?;
            state.advance(&next)?;
        }
    }

    fn multicond<'a>(&self, operands: &[DeviceArray], branches: Vec<Branch<'a>>) -> Result<()> {
        validate_branches(&branches)?;
        for branch in branches {
            let taken = match branch.predicate {
                Some(predicate) => {
                    let predicate = predicate(operands)?;
                    check_predicate(&predicate)?;
                    predicate.item_bool()?
                }
                None => true,
            };
            if taken {
                return (branch.body)(operands);
            }
        }
        Ok(())
    }

    fn stats(&self) -> ConverterStats {
        self.stats.snapshot()
    }
}
