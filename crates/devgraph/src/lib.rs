pub mod capture_settings;
pub mod control;
pub mod device;
mod env;
pub mod error;
pub mod graph;
mod ops;
pub mod signal;
pub mod tensor;

pub use control::{
    Branch, CapturingConverter, ConverterOptions, ConverterStats, FallbackPolicy, GraphConverter,
    Graphified, LoopState, MockConverter, SignaturePolicy,
};
pub use device::{Device, DeviceBackend, Stream};
pub use error::GraphError;
pub use graph::{CapturedGraph, GraphSignature};
pub use tensor::{ArraySpec, DType, DeviceArray, HostData, Scalar, Shape, Tensor};
