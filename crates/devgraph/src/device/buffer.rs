use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::tensor::{ArraySpec, HostData};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Device allocation with a fixed spec. Contents are written by stream workers only.
pub struct Buffer {
    id: BufferId,
    spec: ArraySpec,
    data: RwLock<HostData>,
}

impl Buffer {
    /// Allocates a zero-filled buffer.
    pub(crate) fn allocate(spec: ArraySpec) -> Arc<Self> {
        let data = HostData::zeros(spec.dtype, spec.num_elements());
        Arc::new(Buffer {
            id: BufferId::next(),
            spec,
            data: RwLock::new(data),
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn spec(&self) -> &ArraySpec {
        &self.spec
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, HostData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn store(&self, data: HostData) {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .finish()
    }
}
