//! Captured graphs, their executable instances and the replay interpreter.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use crate::device::executor::execute_kernel;
use crate::device::{BackendError, BackendResult, Buffer, DeviceBackend};
use crate::error::GraphError;
use crate::tensor::DeviceArray;

use super::plan::GraphSignature;
use super::state::{Node, Region, SlotId};

/// Immutable recording produced by one capture.
///
/// `slots` holds the buffers seen during capture. Parameter slots are replaced per launch by
/// [`GraphExec::rebind`]; every other slot is graph-owned and reused by each replay.
pub struct CapturedGraph {
    root: Region,
    slots: Vec<Arc<Buffer>>,
    params: Vec<SlotId>,
    outputs: Vec<SlotId>,
    signature: GraphSignature,
}

impl CapturedGraph {
    pub(crate) fn new(
        root: Region,
        slots: Vec<Arc<Buffer>>,
        params: Vec<SlotId>,
        outputs: Vec<SlotId>,
        signature: GraphSignature,
    ) -> Self {
        CapturedGraph {
            root,
            slots,
            params,
            outputs,
            signature,
        }
    }

    pub fn root(&self) -> &Region {
        &self.root
    }

    pub fn signature(&self) -> &GraphSignature {
        &self.signature
    }

    /// Total node count including nodes nested in conditional and while regions.
    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }

    pub fn kernel_count(&self) -> usize {
        self.root.kernel_count()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether the graph contains conditional or while nodes at any depth.
    pub fn has_control_flow(&self) -> bool {
        self.root.has_control_flow()
    }

    /// Replays the graph against `bindings` on the calling (worker) thread.
    pub(crate) fn run(
        &self,
        backend: &dyn DeviceBackend,
        bindings: &[Arc<Buffer>],
    ) -> BackendResult<()> {
        if bindings.len() != self.slots.len() {
            return Err(BackendError::execution(format!(
                "graph expects {} bindings, got {}",
                self.slots.len(),
                bindings.len()
            )));
        }
        run_region(backend, &self.root, bindings)
    }

    fn write_region(
        &self,
        f: &mut fmt::Formatter<'_>,
        region: &Region,
        depth: usize,
    ) -> fmt::Result {
        let indent = "  ".repeat(depth);
        for node in &region.nodes {
            match node {
                Node::Kernel(kernel) => {
                    let inputs = kernel
                        .inputs
                        .iter()
                        .map(|slot| slot.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    writeln!(
                        f,
                        "{indent}{} = {}({inputs}) : {}",
                        kernel.output,
                        kernel.op,
                        self.slots[kernel.output.0].spec()
                    )?;
                }
                Node::Conditional {
                    predicate,
                    then_region,
                    else_region,
                } => {
                    writeln!(f, "{indent}if {predicate} {{")?;
                    self.write_region(f, then_region, depth + 1)?;
                    if let Some(else_region) = else_region {
                        writeln!(f, "{indent}}} else {{")?;
                        self.write_region(f, else_region, depth + 1)?;
                    }
                    writeln!(f, "{indent}}}")?;
                }
                Node::While {
                    cond_region,
                    predicate,
                    body_region,
                } => {
                    writeln!(f, "{indent}while {{")?;
                    self.write_region(f, cond_region, depth + 1)?;
                    writeln!(f, "{indent}}} test {predicate} do {{")?;
                    self.write_region(f, body_region, depth + 1)?;
                    writeln!(f, "{indent}}}")?;
                }
            }
        }
        Ok(())
    }
}

fn slot_list(slots: &[SlotId]) -> String {
    slots
        .iter()
        .map(|slot| slot.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for CapturedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "graph(params=[{}], outputs=[{}]) {{",
            slot_list(&self.params),
            slot_list(&self.outputs)
        )?;
        self.write_region(f, &self.root, 1)?;
        write!(f, "}}")
    }
}

impl fmt::Debug for CapturedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedGraph")
            .field("signature", &self.signature)
            .field("nodes", &self.node_count())
            .field("slots", &self.slots.len())
            .finish()
    }
}

fn read_predicate(buffer: &Buffer) -> BackendResult<bool> {
    let data = buffer.read();
    if data.len() != 1 {
        return Err(BackendError::execution(format!(
            "predicate must hold one element, found {}",
            data.len()
        )));
    }
    Ok(data.is_truthy(0))
}

fn run_region(
    backend: &dyn DeviceBackend,
    region: &Region,
    bindings: &[Arc<Buffer>],
) -> BackendResult<()> {
    for node in &region.nodes {
        match node {
            Node::Kernel(kernel) => {
                let inputs: Vec<Arc<Buffer>> = kernel
                    .inputs
                    .iter()
                    .map(|slot| Arc::clone(&bindings[slot.0]))
                    .collect();
                execute_kernel(backend, &kernel.op, &inputs, &bindings[kernel.output.0])?;
            }
            Node::Conditional {
                predicate,
                then_region,
                else_region,
            } => {
                if read_predicate(&bindings[predicate.0])? {
                    run_region(backend, then_region, bindings)?;
                } else if let Some(else_region) = else_region {
                    run_region(backend, else_region, bindings)?;
                }
            }
            Node::While {
                cond_region,
                predicate,
                body_region,
            } => loop {
                run_region(backend, cond_region, bindings)?;
                if !read_predicate(&bindings[predicate.0])? {
                    break;
                }
                run_region(backend, body_region, bindings)?;
            },
        }
    }
    Ok(())
}

/// Executable instance of a [`CapturedGraph`] with a rebindable parameter table.
pub struct GraphExec {
    graph: Arc<CapturedGraph>,
    bindings: Mutex<Arc<[Arc<Buffer>]>>,
}

impl GraphExec {
    pub(crate) fn instantiate(graph: CapturedGraph) -> Self {
        let bindings: Arc<[Arc<Buffer>]> = Arc::from(graph.slots.clone());
        GraphExec {
            graph: Arc::new(graph),
            bindings: Mutex::new(bindings),
        }
    }

    pub fn graph(&self) -> &Arc<CapturedGraph> {
        &self.graph
    }

    /// Snapshot of the current slot bindings. Launches hold on to the snapshot they were given.
    pub(crate) fn bindings(&self) -> Arc<[Arc<Buffer>]> {
        Arc::clone(&self.bindings.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Points the parameter slots at the buffers of `args`.
    ///
    /// Fails with [`GraphError::GraphRebind`] unless `args` have exactly the captured shapes,
    /// dtypes and aliasing pattern.
    pub fn rebind(&self, args: &[DeviceArray]) -> Result<()> {
        let found = GraphSignature::of(args);
        if &found != self.graph.signature() {
            return Err(GraphError::GraphRebind {
                expected: self.graph.signature().to_string(),
                found: found.to_string(),
            }
            .into());
        }
        let mut bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = bindings.to_vec();
        for (slot, arg) in self.graph.params.iter().zip(args) {
            next[slot.0] = Arc::clone(arg.buffer());
        }
        *bindings = Arc::from(next);
        Ok(())
    }

    /// Buffers currently bound to the output slots.
    pub(crate) fn output_buffers(&self) -> Vec<Arc<Buffer>> {
        let bindings = self.bindings();
        self.graph
            .outputs
            .iter()
            .map(|slot| Arc::clone(&bindings[slot.0]))
            .collect()
    }
}

impl fmt::Debug for GraphExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphExec")
            .field("graph", &self.graph)
            .finish()
    }
}
