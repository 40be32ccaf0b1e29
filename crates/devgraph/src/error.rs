use thiserror::Error;

/// Failures raised by stream capture, graph replay and the control-flow converters.
///
/// Public APIs return `anyhow::Result`; match on a specific variant with
/// `err.downcast_ref::<GraphError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Capture is disabled by a library flag or the device cannot record the requested construct.
    #[error("graph capture unsupported: {reason}")]
    CaptureUnsupported { reason: String },
    /// Replay was requested with arguments whose signature differs from the captured one.
    #[error("cannot rebind captured graph: expected {expected}, found {found}")]
    GraphRebind { expected: String, found: String },
    /// Loop state, predicate or branch layout is inconsistent with the capture contract.
    #[error("inconsistent control flow structure: {0}")]
    CaptureStructural(String),
    /// Host synchronisation was requested on a stream that is recording.
    #[error("host synchronisation is not allowed while the stream is capturing")]
    SyncDuringCapture,
    /// A graphified function was invoked while its converter was already capturing.
    #[error("converter is already capturing a graph")]
    CaptureInProgress,
    #[error("arrays live on different devices ({expected} vs {found})")]
    DeviceMismatch { expected: u64, found: u64 },
    /// Sticky execution failure reported by a stream worker.
    #[error("device fault: {0}")]
    DeviceFault(String),
}

impl GraphError {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        GraphError::CaptureUnsupported {
            reason: reason.into(),
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        GraphError::CaptureStructural(message.into())
    }
}
