//! UVC-Capture: bring up a USB Video Class camera and stream its frames
//!
//! This library sequences device lookup, format negotiation and streaming
//! behind a trait-based backend, and runs a typed per-frame callback that
//! passes raw frames through or converts them to RGB before handing them to a
//! [`FrameHandler`]. Production uses the V4L2 backend; tests use a mock.

pub mod config;
pub mod context;
pub mod convert;
pub mod device;
pub mod dispatch;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use config::{CaptureConfig, ConfigError};
pub use context::DeviceContext;
pub use device::V4l2Backend;
pub use dispatch::{DispatchOutcome, FrameAction, FrameDispatcher};
pub use traits::{
    DeviceFilter, DeviceInfo, FormatDescriptor, FourCC, Frame, FrameFormat, FrameHandler,
    FrameMetadata, StreamControl, StreamRequest, UvcBackend, UvcError,
};
