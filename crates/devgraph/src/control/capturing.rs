//! Converter that records graphified functions into replayable graphs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tracing::{debug, warn};

use crate::device::{push_stream, Device, Stream};
use crate::error::GraphError;
use crate::graph::{
    CapturedGraph, GraphCache, GraphExec, GraphKey, GraphSignature, GraphifyId, Region,
};
use crate::tensor::DeviceArray;

use super::mock::MockConverter;
use super::options::{ConverterOptions, FallbackPolicy, SignaturePolicy};
use super::stats::{StatEvent, StatsCounters};
use super::{
    check_predicate, ensure_on_device, validate_branches, Branch, ConverterStats, GraphConverter,
    LoopState,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Captures each graphified function on first call and replays the cached graph afterwards.
///
/// Captures run on a dedicated stream owned by the converter. Launches are ordered after the
/// caller's current stream and the caller's stream waits for the replay, so from the caller's
/// point of view a replay behaves like the eager call it stands for. Every call returns freshly
/// allocated output arrays. Captures and replays from several threads are serialised.
///
/// While capturing, [`GraphConverter::while_loop`] and [`GraphConverter::multicond`] record
/// native while and conditional nodes. Outside a capture they run eagerly.
pub struct CapturingConverter {
    device: Device,
    capture_stream: Stream,
    options: ConverterOptions,
    fallback: MockConverter,
    cache: Mutex<GraphCache>,
    /// Held across capture, rebind and launch so concurrent callers never replay with each
    /// other's bindings or read each other's outputs.
    exclusive: Mutex<()>,
    stats: Arc<StatsCounters>,
    warned_fallback: AtomicBool,
}

impl CapturingConverter {
    /// Converter configured from `DEVGRAPH_*` environment variables.
    pub fn new(device: &Device) -> Result<Self> {
        CapturingConverter::with_options(device, ConverterOptions::from_env())
    }

    pub fn with_options(device: &Device, options: ConverterOptions) -> Result<Self> {
        let capture_stream = device.new_stream()?;
        let stats = Arc::new(StatsCounters::default());
        debug!(
            device = %device.id(),
            stream = %capture_stream.id(),
            fallback = %options.fallback,
            signatures = %options.signature_policy,
            capacity = options.cache_capacity,
            "capturing converter ready"
        );
        Ok(CapturingConverter {
            device: device.clone(),
            cache: Mutex::new(GraphCache::new(options.cache_capacity)),
            exclusive: Mutex::new(()),
            fallback: MockConverter::with_stats(device, Arc::clone(&stats)),
            capture_stream,
            options,
            stats,
            warned_fallback: AtomicBool::new(false),
        })
    }

    pub fn options(&self) -> &ConverterOptions {
        &self.options
    }

    /// Stream that captures and replays run on.
    pub fn capture_stream(&self) -> &Stream {
        &self.capture_stream
    }

    /// Total number of graphs held across all graphified functions.
    pub fn cached_graph_count(&self) -> usize {
        lock(&self.cache).len()
    }

    /// True when the calling thread is inside one of this converter's captures.
    fn recording(&self) -> bool {
        self.capture_stream.is_capturing() && self.device.current_stream() == self.capture_stream
    }

    /// Decides whether calls skip capture. Errors under [`FallbackPolicy::Error`].
    fn runs_eagerly(&self) -> Result<bool> {
        if self.options.force_eager {
            return Ok(true);
        }
        if self.device.supports_conditional_nodes() {
            return Ok(false);
        }
        match self.options.fallback {
            FallbackPolicy::Eager => {
                if !self.warned_fallback.swap(true, Ordering::Relaxed) {
                    warn!(
                        backend = self.device.backend_name(),
                        "device cannot record conditional nodes; running graphified functions eagerly"
                    );
                }
                Ok(true)
            }
            FallbackPolicy::Error => Err(GraphError::unsupported(format!(
                "backend '{}' cannot record conditional or while nodes",
                self.device.backend_name()
            ))
            .into()),
        }
    }

    fn capture(
        &self,
        func: &dyn Fn(&[DeviceArray]) -> Result<Vec<DeviceArray>>,
        args: &[DeviceArray],
        signature: GraphSignature,
    ) -> Result<GraphExec> {
        let session = self.capture_stream.begin_capture()?;
        let outputs = {
            let _guard = push_stream(self.capture_stream.clone());
            let params: Vec<_> = args.iter().map(|arg| Arc::clone(arg.buffer())).collect();
            self.capture_stream
                .with_builder(|builder| builder.bind_params(&params))?;
            self.stats.bump(StatEvent::HostInvocation);
            func(args)?
        };
        ensure_on_device(&self.device, &outputs)?;
        let builder = session.finish()?;
        let out_buffers: Vec<_> = outputs
            .iter()
            .map(|output| Arc::clone(output.buffer()))
            .collect();
        let graph = builder.finish(&out_buffers, signature)?;
        debug!(
            nodes = graph.node_count(),
            kernels = graph.kernel_count(),
            control_flow = graph.has_control_flow(),
            "captured graph\n{graph}"
        );
        Ok(GraphExec::instantiate(graph))
    }

    fn launch(&self, exec: &GraphExec) -> Result<Vec<DeviceArray>> {
        let origin = self.device.current_stream();
        self.capture_stream.wait_stream(&origin)?;
        self.capture_stream.launch_graph(exec)?;
        origin.wait_stream(&self.capture_stream)?;
        let outputs = exec
            .output_buffers()
            .into_iter()
            .map(|buffer| DeviceArray::from_parts(self.device.clone(), buffer).copy())
            .collect::<Result<Vec<_>>>()?;
        // The next replay must not overwrite graph-owned outputs before they are copied out.
        self.capture_stream.wait_stream(&origin)?;
        Ok(outputs)
    }

    /// Runs `f` inside a fresh nested region and returns its result with the closed region.
    fn in_region<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<(R, Region)> {
        self.capture_stream.with_builder(|builder| builder.open_region())?;
        let result = f();
        let region = self
            .capture_stream
            .with_builder(|builder| builder.close_region())??;
        Ok((result?, region))
    }

    /// Records `branches` as a cascade of conditional nodes. Later predicates are evaluated in
    /// the else region of earlier ones.
    fn capture_branches(
        &self,
        operands: &[DeviceArray],
        mut branches: Vec<Branch<'_>>,
    ) -> Result<()> {
        if branches.is_empty() {
            return Ok(());
        }
        let branch = branches.remove(0);
        let Some(predicate) = branch.predicate else {
            return (branch.body)(operands);
        };
        let predicate = predicate(operands)?;
        check_predicate(&predicate)?;
        let body = branch.body;
        let ((), then_region) = self.in_region(|| body(operands))?;
        let else_region = if branches.is_empty() {
            None
        } else {
            let ((), region) = self.in_region(|| self.capture_branches(operands, branches))?;
            Some(region)
        };
        self.capture_stream.with_builder(|builder| {
            builder.push_conditional(predicate.buffer(), then_region, else_region)
        })
    }
}

impl GraphConverter for CapturingConverter {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn invoke(
        &self,
        id: GraphifyId,
        func: &dyn Fn(&[DeviceArray]) -> Result<Vec<DeviceArray>>,
        args: &[DeviceArray],
    ) -> Result<Vec<DeviceArray>> {
        ensure_on_device(&self.device, args)?;
        if self.recording() {
            return Err(GraphError::CaptureInProgress.into());
        }
        if self.runs_eagerly()? {
            self.stats.bump(StatEvent::EagerFallback);
            return self.fallback.invoke(id, func, args);
        }

        let _exclusive = lock(&self.exclusive);
        let key = GraphKey {
            func: id,
            signature: GraphSignature::of(args),
        };
        let cached = {
            let mut cache = lock(&self.cache);
            match cache.get(&key) {
                Some(exec) => Some(exec),
                None => match (self.options.signature_policy, cache.latest(id)) {
                    (SignaturePolicy::Strict, Some(existing)) => {
                        return Err(GraphError::GraphRebind {
                            expected: existing.graph().signature().to_string(),
                            found: key.signature.to_string(),
                        }
                        .into());
                    }
                    _ => None,
                },
            }
        };

        let exec = match cached {
            Some(exec) => {
                self.stats.bump(StatEvent::CacheHit);
                self.stats.bump(StatEvent::Replay);
                exec.rebind(args)?;
                exec
            }
            None => {
                self.stats.bump(StatEvent::CacheMiss);
                let exec = Arc::new(self.capture(func, args, key.signature.clone())?);
                self.stats.bump(StatEvent::Capture);
                debug!(func = %id, signature = %key.signature, "graph cached");
                let inserted = lock(&self.cache).insert(key, Arc::clone(&exec));
                if let Some(evicted) = inserted.evicted {
                    self.stats.bump(StatEvent::Eviction);
                    debug!(func = %id, signature = %evicted, "graph evicted");
                }
                exec
            }
        };
        self.launch(&exec)
    }

    fn release(&self, id: GraphifyId) {
        let released = lock(&self.cache).release(id);
        if released > 0 {
            debug!(func = %id, graphs = released, "released cached graphs");
        }
    }

    fn captured_graphs(&self, id: GraphifyId) -> Vec<Arc<CapturedGraph>> {
        lock(&self.cache).graphs(id)
    }

    fn while_loop<C, B, S>(&self, mut cond_fn: C, mut body_fn: B, state: S) -> Result<LoopState>
    where
        C: FnMut(&[DeviceArray]) -> Result<DeviceArray>,
        B: FnMut(&[DeviceArray]) -> Result<Vec<DeviceArray>>,
        S: Into<LoopState>,
    {
        if !self.recording() {
            return self.fallback.while_loop(cond_fn, body_fn, state);
        }
        let state = LoopState::owned(state.into())?;
        let (predicate, cond_region) = self.in_region(|| {
            let predicate = cond_fn(&state)?;
            check_predicate(&predicate)?;
            Ok(predicate)
        })?;
        let ((), body_region) = self.in_region(|| {
            let next = body_fn(&state)?;
            state.advance(&next)
        })?;
        self.capture_stream.with_builder(|builder| {
            builder.push_while(cond_region, predicate.buffer(), body_region)
        })?;
        Ok(state)
    }

    fn multicond<'a>(&self, operands: &[DeviceArray], branches: Vec<Branch<'a>>) -> Result<()> {
        validate_branches(&branches)?;
        if !self.recording() {
            return self.fallback.multicond(operands, branches);
        }
        self.capture_branches(operands, branches)
    }

    fn stats(&self) -> ConverterStats {
        self.stats.snapshot()
    }
}
