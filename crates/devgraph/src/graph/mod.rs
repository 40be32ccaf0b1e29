//! Stream capture output: graphs made of kernel, conditional and while nodes.

mod builder;
mod exec;
mod plan;
mod state;

pub use builder::GraphBuilder;
pub use exec::{CapturedGraph, GraphExec};
pub use plan::{GraphKey, GraphSignature, GraphifyId, DEFAULT_GRAPH_CACHE_CAPACITY};
pub use state::{KernelNode, Node, Region, SlotId};

pub(crate) use plan::GraphCache;
