//! Physical camera support via `nokhwa`.
//!
//! `nokhwa::Camera` is not `Send` on every backend, so each device lives
//! on its own capture thread for its whole lifetime. The handle the
//! registry stores only holds the command channel to that thread.

use super::{CameraConfig, CameraError, CameraId, CaptureDevice, DeviceFactory, Frame};
use crossbeam_channel::{bounded, Sender};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use std::thread::{self, JoinHandle};

enum Command {
    Read(Sender<Result<Frame, CameraError>>),
    Close,
}

struct Worker {
    commands: Sender<Command>,
    thread: JoinHandle<()>,
}

/// A camera opened through the platform's native capture backend.
pub struct NokhwaCamera {
    index: u32,
    worker: Option<Worker>,
}

impl NokhwaCamera {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            worker: None,
        }
    }
}

fn open_stream(index: u32, config: &CameraConfig) -> Result<Camera, CameraError> {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
        CameraFormat::new(
            Resolution::new(config.width, config.height),
            FrameFormat::MJPEG,
            config.fps,
        ),
    ));
    let mut camera = Camera::new(CameraIndex::Index(index), requested).map_err(|e| {
        CameraError::DeviceOpenFailed {
            camera_id: index as CameraId,
            reason: e.to_string(),
        }
    })?;
    camera
        .open_stream()
        .map_err(|e| CameraError::DeviceOpenFailed {
            camera_id: index as CameraId,
            reason: e.to_string(),
        })?;
    Ok(camera)
}

fn capture(camera: &mut Camera, sequence: u64) -> Result<Frame, CameraError> {
    let buffer = camera
        .frame()
        .map_err(|e| CameraError::FrameReadFailed(e.to_string()))?;
    let image = buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| CameraError::FrameReadFailed(e.to_string()))?;
    let (width, height) = (image.width(), image.height());
    Ok(Frame::new(image.into_raw(), width, height, sequence))
}

fn run_worker(
    index: u32,
    config: CameraConfig,
    ready: Sender<Result<(), CameraError>>,
    commands: crossbeam_channel::Receiver<Command>,
) {
    let mut camera = match open_stream(index, &config) {
        Ok(camera) => {
            let _ = ready.send(Ok(()));
            camera
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut sequence = 0u64;
    while let Ok(command) = commands.recv() {
        match command {
            Command::Read(reply) => {
                sequence += 1;
                let _ = reply.send(capture(&mut camera, sequence));
            }
            Command::Close => break,
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!(index, error = %e, "Failed to stop camera stream");
    }
}

impl CaptureDevice for NokhwaCamera {
    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        config
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;

        let (ready_tx, ready_rx) = bounded(1);
        let (command_tx, command_rx) = bounded(1);
        let index = self.index;
        let worker_config = config.clone();
        let thread = thread::Builder::new()
            .name(format!("nokhwa-{index}"))
            .spawn(move || run_worker(index, worker_config, ready_tx, command_rx))
            .map_err(|e| CameraError::DeviceOpenFailed {
                camera_id: index as CameraId,
                reason: e.to_string(),
            })?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(CameraError::DeviceOpenFailed {
                camera_id: index as CameraId,
                reason: "capture thread exited during open".to_string(),
            })
        });
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        self.worker = Some(Worker {
            commands: command_tx,
            thread,
        });
        tracing::info!(index, ?config, "Camera stream opened");
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let worker = self.worker.as_ref().ok_or(CameraError::NotInitialized)?;
        let (reply_tx, reply_rx) = bounded(1);
        worker
            .commands
            .send(Command::Read(reply_tx))
            .map_err(|_| CameraError::FrameReadFailed("capture thread exited".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| CameraError::FrameReadFailed("capture thread exited".to_string()))?
    }

    fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(Command::Close);
            if worker.thread.join().is_err() {
                tracing::warn!(index = self.index, "Capture thread panicked");
            }
        }
    }
}

impl Drop for NokhwaCamera {
    fn drop(&mut self) {
        self.close();
    }
}

/// Factory for native cameras; the camera identifier is the device index.
#[derive(Debug, Clone, Copy, Default)]
pub struct NokhwaFactory;

impl DeviceFactory for NokhwaFactory {
    fn create(&self, camera_id: CameraId) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let index = u32::try_from(camera_id).map_err(|_| CameraError::DeviceOpenFailed {
            camera_id,
            reason: "camera index must be non-negative".to_string(),
        })?;
        Ok(Box::new(NokhwaCamera::new(index)))
    }
}
