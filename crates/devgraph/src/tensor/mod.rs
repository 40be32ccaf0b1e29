//! Array metadata, host tensors and device-resident array handles.

mod device_array;
mod dtype;
mod host_tensor;
mod scalar;
mod shape;
mod spec;

pub use device_array::DeviceArray;
pub use dtype::DType;
pub use host_tensor::{HostData, Tensor};
pub use scalar::Scalar;
pub use shape::Shape;
pub use spec::ArraySpec;
