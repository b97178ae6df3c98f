//! Camera abstraction for frame capture.
//!
//! Capture devices sit behind a trait so the registry and capture loops
//! can run against real hardware or synthetic sources in tests.

use super::{CameraConfig, CameraId, Frame};
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera {camera_id} open failed: {reason}")]
    DeviceOpenFailed { camera_id: CameraId, reason: String },
    #[error("failed to configure camera: {0}")]
    ConfigFailed(String),
    #[error("failed to read frame: {0}")]
    FrameReadFailed(String),
    #[error("camera not initialized")]
    NotInitialized,
}

/// A single capture device.
///
/// Implementations must be `Send`: a device is opened on the thread that
/// calls [`DeviceRegistry::open`](super::DeviceRegistry::open) and read from
/// its capture loop thread.
pub trait CaptureDevice: Send {
    /// Opens the device and applies width, height and frame rate.
    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError>;

    /// Reads a single frame, blocking until one is available.
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// Checks if the device is currently open.
    fn is_open(&self) -> bool;

    /// Closes the device and releases resources.
    fn close(&mut self);
}

/// Creates unopened devices for camera identifiers.
pub trait DeviceFactory: Send + Sync {
    fn create(&self, camera_id: CameraId) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

impl<F: DeviceFactory + ?Sized> DeviceFactory for Box<F> {
    fn create(&self, camera_id: CameraId) -> Result<Box<dyn CaptureDevice>, CameraError> {
        (**self).create(camera_id)
    }
}

/// Image content produced by [`SyntheticCamera`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticPattern {
    /// Every pixel has the same colour.
    Solid([u8; 3]),
    /// Red follows x, green follows y, blue follows the frame sequence.
    Gradient,
}

impl Default for SyntheticPattern {
    fn default() -> Self {
        SyntheticPattern::Solid([32, 96, 160])
    }
}

/// Device that generates synthetic frames at the configured size.
#[derive(Debug, Default)]
pub struct SyntheticCamera {
    config: Option<CameraConfig>,
    pattern: SyntheticPattern,
    sequence: u64,
    /// Reads fail once this many frames have been produced.
    fail_after: Option<u64>,
}

impl SyntheticCamera {
    pub fn new(pattern: SyntheticPattern) -> Self {
        Self {
            pattern,
            ..Default::default()
        }
    }

    /// Makes every read after the first `frames` fail.
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

impl CaptureDevice for SyntheticCamera {
    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        config
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;
        self.config = Some(config.clone());
        self.sequence = 0;
        tracing::debug!(?config, pattern = ?self.pattern, "SyntheticCamera opened");
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let config = self.config.as_ref().ok_or(CameraError::NotInitialized)?;
        if self.fail_after.is_some_and(|limit| self.sequence >= limit) {
            return Err(CameraError::FrameReadFailed(format!(
                "synthetic device exhausted after {} frames",
                self.sequence
            )));
        }

        self.sequence += 1;
        let (width, height) = (config.width, config.height);
        let frame = match self.pattern {
            SyntheticPattern::Solid(rgb) => Frame::solid(width, height, rgb, self.sequence),
            SyntheticPattern::Gradient => {
                let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
                for y in 0..height {
                    for x in 0..width {
                        pixels.extend_from_slice(&[x as u8, y as u8, self.sequence as u8]);
                    }
                }
                Frame::new(pixels, width, height, self.sequence)
            }
        };
        Ok(frame)
    }

    fn is_open(&self) -> bool {
        self.config.is_some()
    }

    fn close(&mut self) {
        self.config = None;
        tracing::debug!("SyntheticCamera closed");
    }
}

/// Factory for [`SyntheticCamera`] devices.
///
/// Negative identifiers never name a device and fail to open, which
/// mirrors how an absent physical camera behaves.
#[derive(Debug, Clone, Default)]
pub struct SyntheticFactory {
    pattern: SyntheticPattern,
    fail_after: Option<u64>,
}

impl SyntheticFactory {
    pub fn new(pattern: SyntheticPattern) -> Self {
        Self {
            pattern,
            fail_after: None,
        }
    }

    /// Devices created by this factory fail reads after `frames` frames.
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

impl DeviceFactory for SyntheticFactory {
    fn create(&self, camera_id: CameraId) -> Result<Box<dyn CaptureDevice>, CameraError> {
        if camera_id < 0 {
            return Err(CameraError::DeviceOpenFailed {
                camera_id,
                reason: "no such device".to_string(),
            });
        }
        let mut camera = SyntheticCamera::new(self.pattern);
        camera.fail_after = self.fail_after;
        Ok(Box::new(camera))
    }
}
