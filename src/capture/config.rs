//! Camera and streaming configuration.
//!
//! `CameraConfig` is built once at startup and shared by every capture
//! loop. `FileConfig` is the on-disk TOML layout that wires cameras to
//! ports.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Integer key naming one capture device.
pub type CameraId = i32;

/// Highest accepted JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;
/// Highest accepted zlib level.
pub const MAX_ZLIB_LEVEL: u32 = 9;

/// Capture and compression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target frames per second; also the capture loop pacing rate.
    pub fps: u32,
    /// JPEG quality, 0 (lowest) to 100 (highest fidelity).
    pub jpeg_quality: u8,
    /// zlib level, 0 (stored) to 9 (best ratio).
    pub zlib_level: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            jpeg_quality: 85,
            zlib_level: 1,
        }
    }
}

impl CameraConfig {
    /// Creates a new configuration with the specified dimensions.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.fps == 0 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.jpeg_quality > MAX_JPEG_QUALITY {
            return Err(ConfigError::InvalidQuality(self.jpeg_quality));
        }
        if self.zlib_level > MAX_ZLIB_LEVEL {
            return Err(ConfigError::InvalidCompressionLevel(self.zlib_level));
        }
        Ok(())
    }

    /// Sleep between capture loop iterations.
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    #[error("invalid frame rate (must be > 0)")]
    InvalidFrameRate,
    #[error("invalid jpeg quality {0} (must be 0-100)")]
    InvalidQuality(u8),
    #[error("invalid zlib level {0} (must be 0-9)")]
    InvalidCompressionLevel(u32),
    #[error("send high-water mark must be at least 1")]
    InvalidHighWaterMark,
    #[error("camera {0} is configured more than once")]
    DuplicateCamera(CameraId),
    #[error("no streams or pull endpoint configured")]
    NothingToServe,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// One camera published on one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub camera_id: CameraId,
    /// Publisher port. Entries sharing a port share one publisher.
    pub port: u16,
}

/// Outbound transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Interface to bind publishers and the responder on.
    pub bind_host: String,
    /// Per-subscriber outbound queue capacity, in frames.
    pub send_hwm: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            send_hwm: 4,
        }
    }
}

/// Request/response (pull) endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullConfig {
    pub camera_id: CameraId,
    pub port: u16,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metrics server port (0 to disable).
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamEntry>,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub pull: Option<PullConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_streams() -> Vec<StreamEntry> {
    vec![StreamEntry {
        camera_id: 0,
        port: 5555,
    }]
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            streams: default_streams(),
            transport: TransportConfig::default(),
            pull: None,
            metrics: MetricsConfig::default(),
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config: FileConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates camera settings and the stream wiring.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.camera.validate()?;
        if self.transport.send_hwm == 0 {
            return Err(ConfigError::InvalidHighWaterMark);
        }
        if self.streams.is_empty() && self.pull.is_none() {
            return Err(ConfigError::NothingToServe);
        }
        let mut seen = HashSet::new();
        for entry in &self.streams {
            if !seen.insert(entry.camera_id) {
                return Err(ConfigError::DuplicateCamera(entry.camera_id));
            }
        }
        Ok(())
    }
}
