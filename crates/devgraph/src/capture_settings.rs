//! Process-wide switches consulted while a stream is capturing.
//!
//! Dense linear algebra (`matmul`, `norm`) is served by a BLAS-style sub-library that must be
//! explicitly allowed to participate in stream capture. The flag defaults to the value of
//! `DEVGRAPH_ALLOW_BLAS_CAPTURE` (off when unset).

use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;

static BLAS_CAPTURE_ALLOWED: Lazy<AtomicBool> =
    Lazy::new(|| AtomicBool::new(crate::env::allow_blas_capture()));

/// Returns whether BLAS-backed kernels may be recorded into a graph.
pub fn blas_capture_allowed() -> bool {
    BLAS_CAPTURE_ALLOWED.load(Ordering::Acquire)
}

/// Enables or disables BLAS capture and returns the previous value.
pub fn set_blas_capture_allowed(allowed: bool) -> bool {
    BLAS_CAPTURE_ALLOWED.swap(allowed, Ordering::AcqRel)
}
