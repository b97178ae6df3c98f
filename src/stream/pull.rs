//! Frame source for the request/response endpoint.

use crate::capture::{CameraId, DeviceRegistry};
use crate::codec::{CodecPipeline, CompressedFrame};
use crate::error::StreamError;
use crate::metrics::CameraMetrics;
use crate::transport::{FrameHeader, FrameProvider};
use std::sync::Arc;

/// Captures and compresses one fresh frame per request.
///
/// The device is looked up on every request, so a camera released by its
/// capture loop turns into [`StreamError::DeviceNotReady`] rather than a
/// stale handle.
pub struct RegistryFrameProvider {
    camera_id: CameraId,
    registry: Arc<DeviceRegistry>,
    pipeline: CodecPipeline,
    metrics: CameraMetrics,
}

impl RegistryFrameProvider {
    pub fn new(
        camera_id: CameraId,
        registry: Arc<DeviceRegistry>,
        pipeline: CodecPipeline,
        metrics: CameraMetrics,
    ) -> Self {
        Self {
            camera_id,
            registry,
            pipeline,
            metrics,
        }
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }
}

impl FrameProvider for RegistryFrameProvider {
    fn next_frame(&self) -> Result<(FrameHeader, CompressedFrame), StreamError> {
        let device = self
            .registry
            .get(self.camera_id)
            .ok_or(StreamError::DeviceNotReady(self.camera_id))?;

        let frame = device.read_frame().inspect_err(|_| self.metrics.read_failed())?;
        self.metrics.frame_captured();

        let (width, height) = self.pipeline.output_dimensions(frame.width(), frame.height());
        let compressed = self
            .pipeline
            .compress(&frame)
            .inspect_err(|_| self.metrics.encode_failed())?;
        self.metrics.frame_encoded(compressed.len());
        self.metrics.frame_published();

        Ok((FrameHeader::for_dimensions(width, height), compressed))
    }
}
