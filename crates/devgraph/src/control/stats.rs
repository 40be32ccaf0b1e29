use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of a converter's execution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConverterStats {
    /// Graphs recorded.
    pub captures: u64,
    /// Launches of an already cached graph.
    pub replays: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    /// Graphified calls served by eager execution on a capturing converter.
    pub eager_fallbacks: u64,
    /// Times a graphified function body ran on the host.
    pub host_invocations: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum StatEvent {
    Capture,
    Replay,
    CacheHit,
    CacheMiss,
    Eviction,
    EagerFallback,
    HostInvocation,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    captures: AtomicU64,
    replays: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
    eager_fallbacks: AtomicU64,
    host_invocations: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn bump(&self, event: StatEvent) {
        let counter = match event {
            StatEvent::Capture => &self.captures,
            StatEvent::Replay => &self.replays,
            StatEvent::CacheHit => &self.cache_hits,
            StatEvent::CacheMiss => &self.cache_misses,
            StatEvent::Eviction => &self.evictions,
            StatEvent::EagerFallback => &self.eager_fallbacks,
            StatEvent::HostInvocation => &self.host_invocations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConverterStats {
        ConverterStats {
            captures: self.captures.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            eager_fallbacks: self.eager_fallbacks.load(Ordering::Relaxed),
            host_invocations: self.host_invocations.load(Ordering::Relaxed),
        }
    }
}
