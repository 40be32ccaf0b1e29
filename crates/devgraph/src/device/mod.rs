//! Simulated accelerator: buffers, kernels, streams and the backend that evaluates kernels.

mod backend;
mod buffer;
pub mod context;
pub(crate) mod executor;
mod kernel;
mod stream;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

pub use backend::{BackendError, BackendResult, DeviceBackend, HostOperand};
pub use buffer::{Buffer, BufferId};
pub use context::{push_stream, with_stream, StreamGuard};
pub use kernel::{
    ArgReduceOp, BinaryOp, CompareOp, CustomKernel, HostKernel, KernelLaunch, Operation, ReduceOp,
    UnaryOp,
};
pub use stream::{Event, Stream, StreamId};

pub(crate) use stream::CaptureSession;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device{}", self.0)
    }
}

/// State shared between a device handle and its stream workers.
pub(crate) struct DeviceShared {
    pub(crate) id: DeviceId,
    pub(crate) backend: Arc<dyn DeviceBackend>,
    fault: Mutex<Option<String>>,
}

impl DeviceShared {
    /// Keeps the first fault; once set, workers skip further kernels on every stream.
    pub(crate) fn record_fault(&self, message: String) {
        let mut fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if fault.is_none() {
            *fault = Some(message);
        }
    }

    pub(crate) fn fault(&self) -> Option<String> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_faulted(&self) -> bool {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Handle to a device. Clones refer to the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    shared: Arc<DeviceShared>,
    default_stream: Stream,
}

impl Device {
    /// Creates a device driven by `backend`, with its default stream running.
    pub fn new(backend: impl DeviceBackend + 'static) -> Result<Self> {
        Device::with_backend(Arc::new(backend))
    }

    pub fn with_backend(backend: Arc<dyn DeviceBackend>) -> Result<Self> {
        let shared = Arc::new(DeviceShared {
            id: DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed)),
            backend,
            fault: Mutex::new(None),
        });
        let default_stream = Stream::spawn(Arc::clone(&shared))?;
        Ok(Device {
            inner: Arc::new(DeviceInner {
                shared,
                default_stream,
            }),
        })
    }

    pub fn id(&self) -> DeviceId {
        self.inner.shared.id
    }

    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.inner.shared.backend
    }

    pub fn backend_name(&self) -> &str {
        self.inner.shared.backend.backend_name()
    }

    pub fn supports_conditional_nodes(&self) -> bool {
        self.inner.shared.backend.supports_conditional_nodes()
    }

    pub fn default_stream(&self) -> &Stream {
        &self.inner.default_stream
    }

    /// Creates an additional stream with its own worker.
    pub fn new_stream(&self) -> Result<Stream> {
        Stream::spawn(Arc::clone(&self.inner.shared))
    }

    /// Stream that array operations on this device enqueue onto from the calling thread.
    pub fn current_stream(&self) -> Stream {
        context::pushed_stream(self.id()).unwrap_or_else(|| self.inner.default_stream.clone())
    }

    /// Synchronises the current stream.
    pub fn synchronize(&self) -> Result<()> {
        self.current_stream().synchronize()
    }

    /// First execution failure observed on any stream of this device.
    pub fn fault(&self) -> Option<String> {
        self.inner.shared.fault()
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id())
            .field("backend", &self.backend_name())
            .finish()
    }
}
