//! Cache keys and the per-function graph cache.
//!
//! A graph is reusable for a call exactly when the call's [`GraphSignature`] equals the one it
//! was captured with: same arity, same shape and dtype per argument, and the same pattern of
//! arguments sharing a buffer. Nothing else (buffer identity, contents) participates.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use serde::Serialize;
use smallvec::SmallVec;

use crate::tensor::{ArraySpec, DeviceArray};

use super::exec::{CapturedGraph, GraphExec};

/// Default number of graphs retained per graphified function before LRU eviction kicks in.
pub const DEFAULT_GRAPH_CACHE_CAPACITY: usize = 8;

static NEXT_GRAPHIFY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one graphified function object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GraphifyId(u64);

impl GraphifyId {
    pub(crate) fn next() -> Self {
        GraphifyId(NEXT_GRAPHIFY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for GraphifyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// Shapes, dtypes and buffer aliasing of a call's arguments.
///
/// `aliases[i]` is the index of the first argument sharing argument `i`'s buffer (itself when
/// unshared).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct GraphSignature {
    specs: Vec<ArraySpec>,
    aliases: SmallVec<[usize; 8]>,
}

impl GraphSignature {
    pub fn of(args: &[DeviceArray]) -> Self {
        let specs = args.iter().map(|arg| arg.spec().clone()).collect();
        let aliases = args
            .iter()
            .enumerate()
            .map(|(index, arg)| {
                args[..index]
                    .iter()
                    .position(|earlier| earlier.same_buffer(arg))
                    .unwrap_or(index)
            })
            .collect();
        GraphSignature { specs, aliases }
    }

    pub fn specs(&self) -> &[ArraySpec] {
        &self.specs
    }

    pub fn aliases(&self) -> &[usize] {
        &self.aliases
    }

    pub fn arity(&self) -> usize {
        self.specs.len()
    }
}

impl fmt::Display for GraphSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let specs = self
            .specs
            .iter()
            .map(|spec| spec.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "({specs})")?;
        let shared = self
            .aliases
            .iter()
            .enumerate()
            .filter(|(index, first)| index != *first)
            .map(|(index, first)| format!("{index}->{first}"))
            .collect::<Vec<_>>();
        if !shared.is_empty() {
            write!(f, " aliases [{}]", shared.join(", "))?;
        }
        Ok(())
    }
}

/// Explicit cache key: function identity plus argument signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphKey {
    pub func: GraphifyId,
    pub signature: GraphSignature,
}

/// Result of inserting into a [`GraphCache`].
#[derive(Debug)]
pub(crate) struct Inserted {
    pub(crate) evicted: Option<GraphSignature>,
}

/// Converter-owned cache holding one LRU of executables per graphified function.
pub(crate) struct GraphCache {
    capacity: NonZeroUsize,
    functions: HashMap<GraphifyId, LruCache<GraphSignature, Arc<GraphExec>>>,
}

impl GraphCache {
    pub(crate) fn new(capacity: usize) -> Self {
        GraphCache {
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            functions: HashMap::new(),
        }
    }

    /// Looks up `key`, marking it most recently used.
    pub(crate) fn get(&mut self, key: &GraphKey) -> Option<Arc<GraphExec>> {
        self.functions
            .get_mut(&key.func)
            .and_then(|graphs| graphs.get(&key.signature))
            .cloned()
    }

    /// Most recently used executable of `func`, if any.
    pub(crate) fn latest(&self, func: GraphifyId) -> Option<Arc<GraphExec>> {
        self.functions
            .get(&func)
            .and_then(|graphs| graphs.iter().next())
            .map(|(_, exec)| Arc::clone(exec))
    }

    pub(crate) fn insert(&mut self, key: GraphKey, exec: Arc<GraphExec>) -> Inserted {
        let capacity = self.capacity;
        let graphs = self
            .functions
            .entry(key.func)
            .or_insert_with(|| LruCache::new(capacity));
        let inserted = key.signature.clone();
        let evicted = graphs
            .push(key.signature, exec)
            .map(|(signature, _)| signature)
            .filter(|signature| *signature != inserted);
        Inserted { evicted }
    }

    /// Drops every graph of `func` and returns how many were held.
    pub(crate) fn release(&mut self, func: GraphifyId) -> usize {
        self.functions
            .remove(&func)
            .map_or(0, |graphs| graphs.len())
    }

    pub(crate) fn graphs(&self, func: GraphifyId) -> Vec<Arc<CapturedGraph>> {
        self.functions.get(&func).map_or_else(Vec::new, |graphs| {
            graphs
                .iter()
                .map(|(_, exec)| Arc::clone(exec.graph()))
                .collect()
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.functions.values().map(LruCache::len).sum()
    }
}
