//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use camstream::capture::{
    CameraConfig, CameraError, CameraId, CaptureDevice, DeviceFactory, FileConfig, Frame,
    StreamEntry, SyntheticCamera, SyntheticPattern,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Open and close calls observed per camera.
#[derive(Debug, Default)]
pub struct Calls {
    pub opens: HashMap<CameraId, usize>,
    pub closes: HashMap<CameraId, usize>,
}

/// Synthetic devices that record lifecycle calls and can be made slow.
#[derive(Clone, Default)]
pub struct CountingFactory {
    pub calls: Arc<Mutex<Calls>>,
    read_delay: Option<Duration>,
}

impl CountingFactory {
    pub fn slow(read_delay: Duration) -> Self {
        Self {
            read_delay: Some(read_delay),
            ..Self::default()
        }
    }

    pub fn opens(&self, camera_id: CameraId) -> usize {
        self.calls.lock().unwrap().opens.get(&camera_id).copied().unwrap_or(0)
    }

    pub fn closes(&self, camera_id: CameraId) -> usize {
        self.calls.lock().unwrap().closes.get(&camera_id).copied().unwrap_or(0)
    }
}

struct CountingCamera {
    camera_id: CameraId,
    inner: SyntheticCamera,
    calls: Arc<Mutex<Calls>>,
    read_delay: Option<Duration>,
}

impl CaptureDevice for CountingCamera {
    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        self.inner.open(config)?;
        *self.calls.lock().unwrap().opens.entry(self.camera_id).or_default() += 1;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        self.inner.read_frame()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&mut self) {
        self.inner.close();
        *self.calls.lock().unwrap().closes.entry(self.camera_id).or_default() += 1;
    }
}

impl DeviceFactory for CountingFactory {
    fn create(&self, camera_id: CameraId) -> Result<Box<dyn CaptureDevice>, CameraError> {
        if camera_id < 0 {
            return Err(CameraError::DeviceOpenFailed {
                camera_id,
                reason: "no such device".to_string(),
            });
        }
        Ok(Box::new(CountingCamera {
            camera_id,
            inner: SyntheticCamera::new(SyntheticPattern::Solid([200, 40, 40])),
            calls: Arc::clone(&self.calls),
            read_delay: self.read_delay,
        }))
    }
}

/// The 640x480 scenario settings.
pub fn vga_config() -> CameraConfig {
    CameraConfig {
        width: 640,
        height: 480,
        fps: 30,
        jpeg_quality: 90,
        zlib_level: 1,
    }
}

/// Loopback server config publishing each camera on an ephemeral port.
pub fn loopback_config(camera: CameraConfig, cameras: &[CameraId]) -> FileConfig {
    let mut config = FileConfig::default();
    config.camera = camera;
    config.transport.bind_host = "127.0.0.1".to_string();
    config.streams = cameras
        .iter()
        .map(|&camera_id| StreamEntry { camera_id, port: 0 })
        .collect();
    config
}
