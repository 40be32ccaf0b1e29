use std::fmt;

use smallvec::SmallVec;

use crate::device::Operation;

/// Index into a captured graph's buffer slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Kernel recorded with slot operands instead of concrete buffers.
#[derive(Debug, Clone)]
pub struct KernelNode {
    pub op: Operation,
    pub inputs: SmallVec<[SlotId; 4]>,
    pub output: SlotId,
}

#[derive(Debug, Clone)]
pub enum Node {
    Kernel(KernelNode),
    /// Runs `then_region` when the one-element `predicate` slot is non-zero, else `else_region`.
    Conditional {
        predicate: SlotId,
        then_region: Region,
        else_region: Option<Region>,
    },
    /// Runs `cond_region`, tests `predicate`, and repeats `body_region` while it holds.
    While {
        cond_region: Region,
        predicate: SlotId,
        body_region: Region,
    },
}

/// Ordered list of nodes executed in sequence.
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub(crate) nodes: Vec<Node>,
}

impl Region {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Counts nodes in this region and all nested regions.
    pub fn node_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| match node {
                Node::Kernel(_) => 1,
                Node::Conditional {
                    then_region,
                    else_region,
                    ..
                } => {
                    1 + then_region.node_count()
                        + else_region.as_ref().map_or(0, Region::node_count)
                }
                Node::While {
                    cond_region,
                    body_region,
                    ..
                } => 1 + cond_region.node_count() + body_region.node_count(),
            })
            .sum()
    }

    /// Counts kernel nodes only, including nested regions.
    pub fn kernel_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| match node {
                Node::Kernel(_) => 1,
                Node::Conditional {
                    then_region,
                    else_region,
                    ..
                } => then_region.kernel_count() + else_region.as_ref().map_or(0, Region::kernel_count),
                Node::While {
                    cond_region,
                    body_region,
                    ..
                } => cond_region.kernel_count() + body_region.kernel_count(),
            })
            .sum()
    }

    pub(crate) fn has_control_flow(&self) -> bool {
        self.nodes
            .iter()
            .any(|node| !matches!(node, Node::Kernel(_)))
    }
}
