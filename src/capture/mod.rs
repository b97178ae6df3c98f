//! Camera input and device ownership.
//!
//! This module provides the capture device abstraction, the frame type,
//! configuration, and the registry that owns every opened device.

mod camera;
mod config;
mod frame;
#[cfg(feature = "camera")]
mod native;
mod registry;

pub use camera::{
    CameraError, CaptureDevice, DeviceFactory, SyntheticCamera, SyntheticFactory, SyntheticPattern,
};
pub use config::{
    CameraConfig, CameraId, ConfigError, FileConfig, MetricsConfig, PullConfig, StreamEntry,
    TransportConfig, MAX_JPEG_QUALITY, MAX_ZLIB_LEVEL,
};
pub use frame::{Frame, PixelFormat};
#[cfg(feature = "camera")]
pub use native::{NokhwaCamera, NokhwaFactory};
pub use registry::{DeviceHandle, DeviceRegistry};
