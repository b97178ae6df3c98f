//! Crate-level error type.

use crate::capture::{CameraError, CameraId, ConfigError};
use crate::codec::CodecError;
use crate::metrics::MetricsError;
use crate::transport::TransportError;
use thiserror::Error;

/// Any failure surfaced by the streaming system.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error("camera {0} is not open")]
    DeviceNotReady(CameraId),
    #[error("camera {0} is already streaming")]
    AlreadyRunning(CameraId),
    #[error("camera {0} has no configured stream")]
    UnknownCamera(CameraId),
    #[error("server has been shut down")]
    ShutDown,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}
