//! Recording state of a capturing stream.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::device::{Buffer, BufferId, KernelLaunch};
use crate::error::GraphError;

use super::exec::CapturedGraph;
use super::plan::GraphSignature;
use super::state::{KernelNode, Node, Region, SlotId};

/// Accumulates nodes while a stream captures.
///
/// Every buffer touched during capture gets one slot. Nested regions form a stack: control-flow
/// converters open a region, run the user closure (whose kernels land in that region) and close
/// it again before attaching it to a conditional or while node.
pub struct GraphBuilder {
    slots: Vec<Arc<Buffer>>,
    slot_of: HashMap<BufferId, SlotId>,
    root: Region,
    open: Vec<Region>,
    params: Vec<SlotId>,
}

impl GraphBuilder {
    pub(crate) fn new() -> Self {
        GraphBuilder {
            slots: Vec::new(),
            slot_of: HashMap::new(),
            root: Region::default(),
            open: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Returns the slot of `buffer`, assigning a new one on first use.
    pub(crate) fn slot(&mut self, buffer: &Arc<Buffer>) -> SlotId {
        if let Some(slot) = self.slot_of.get(&buffer.id()) {
            return *slot;
        }
        let slot = SlotId(self.slots.len());
        self.slots.push(Arc::clone(buffer));
        self.slot_of.insert(buffer.id(), slot);
        slot
    }

    /// Registers the argument buffers, in order, as rebindable parameters.
    pub(crate) fn bind_params(&mut self, buffers: &[Arc<Buffer>]) {
        for buffer in buffers {
            let slot = self.slot(buffer);
            self.params.push(slot);
        }
    }

    fn current(&mut self) -> &mut Region {
        match self.open.last_mut() {
            Some(region) => region,
            None => &mut self.root,
        }
    }

    pub(crate) fn record_kernel(&mut self, launch: KernelLaunch) {
        let inputs = launch.inputs.iter().map(|buffer| self.slot(buffer)).collect();
        let output = self.slot(&launch.output);
        self.current().nodes.push(Node::Kernel(KernelNode {
            op: launch.op,
            inputs,
            output,
        }));
    }

    /// Number of open nested regions.
    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.open.len()
    }

    pub(crate) fn open_region(&mut self) {
        self.open.push(Region::default());
    }

    pub(crate) fn close_region(&mut self) -> Result<Region> {
        self.open
            .pop()
            .ok_or_else(|| GraphError::structural("no nested region is open").into())
    }

    pub(crate) fn push_conditional(
        &mut self,
        predicate: &Arc<Buffer>,
        then_region: Region,
        else_region: Option<Region>,
    ) {
        let predicate = self.slot(predicate);
        self.current().nodes.push(Node::Conditional {
            predicate,
            then_region,
            else_region,
        });
    }

    pub(crate) fn push_while(
        &mut self,
        cond_region: Region,
        predicate: &Arc<Buffer>,
        body_region: Region,
    ) {
        let predicate = self.slot(predicate);
        self.current().nodes.push(Node::While {
            cond_region,
            predicate,
            body_region,
        });
    }

    /// Seals the recording into a graph whose outputs are `outputs`.
    pub(crate) fn finish(
        mut self,
        outputs: &[Arc<Buffer>],
        signature: GraphSignature,
    ) -> Result<CapturedGraph> {
        if !self.open.is_empty() {
            return Err(GraphError::structural(format!(
                "capture ended with {} unclosed region(s)",
                self.open.len()
            ))
            .into());
        }
        let outputs = outputs.iter().map(|buffer| self.slot(buffer)).collect();
        Ok(CapturedGraph::new(
            self.root,
            self.slots,
            self.params,
            outputs,
            signature,
        ))
    }
}
