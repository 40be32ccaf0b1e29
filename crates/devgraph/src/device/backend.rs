use std::fmt;

use crate::tensor::{ArraySpec, HostData};

use super::kernel::Operation;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Operand count, shape or dtype does not satisfy the kernel contract.
    InvalidOperands { op: &'static str, reason: String },
    Unimplemented { op: &'static str, reason: String },
    Execution { message: String },
}

impl BackendError {
    pub fn invalid(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::InvalidOperands {
            op,
            reason: reason.into(),
        }
    }

    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::InvalidOperands { op, reason } => {
                write!(f, "invalid operands for {op}: {reason}")
            }
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::Execution { message } => {
                write!(f, "backend execution failure: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Read-only view of one kernel input: the buffer spec and its current contents.
#[derive(Debug, Clone, Copy)]
pub struct HostOperand<'a> {
    pub spec: &'a ArraySpec,
    pub data: &'a HostData,
}

impl<'a> HostOperand<'a> {
    pub fn new(spec: &'a ArraySpec, data: &'a HostData) -> Self {
        HostOperand { spec, data }
    }

    pub fn dims(&self) -> &'a [usize] {
        self.spec.shape.dims()
    }
}

/// Kernel executor behind a [`Device`](super::Device).
///
/// Implementations evaluate one operation at a time over host-visible storage; the stream
/// workers take care of ordering, buffer ownership and fault propagation.
pub trait DeviceBackend: Send + Sync {
    /// Returns a human-readable backend identifier (e.g., `"cpu"`).
    fn backend_name(&self) -> &str;

    /// Whether captured graphs may contain conditional and while nodes.
    ///
    /// Backends returning `false` can still replay straight-line graphs; converters fall back to
    /// eager execution (or fail, depending on policy) for control flow.
    fn supports_conditional_nodes(&self) -> bool {
        true
    }

    /// Evaluates `op` over `inputs`, producing storage that matches `output`.
    fn execute(
        &self,
        op: &Operation,
        inputs: &[HostOperand<'_>],
        output: &ArraySpec,
    ) -> BackendResult<HostData>;
}
