//! Metrics collection and registry.

use crate::capture::CameraId;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Point-in-time counter values for one camera.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraSnapshot {
    pub frames_captured: u64,
    pub frames_published: u64,
    pub frames_dropped: u64,
    pub encode_failures: u64,
    pub read_failures: u64,
    pub compressed_bytes: u64,
}

/// Prometheus metrics registry for the streaming pipeline.
pub struct MetricsRegistry {
    registry: Registry,

    frames_captured: IntCounterVec,
    frames_published: IntCounterVec,
    frames_dropped: IntCounterVec,
    encode_failures: IntCounterVec,
    read_failures: IntCounterVec,
    compressed_bytes: IntCounterVec,

    active_loops: IntGauge,
}

fn camera_counter(name: &str, help: &str) -> Result<IntCounterVec, MetricsError> {
    Ok(IntCounterVec::new(Opts::new(name, help), &["camera"])?)
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all pipeline metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_captured = camera_counter(
            "camstream_frames_captured_total",
            "Frames read from the capture device",
        )?;
        let frames_published = camera_counter(
            "camstream_frames_published_total",
            "Frames handed to every subscriber queue",
        )?;
        let frames_dropped = camera_counter(
            "camstream_frames_dropped_total",
            "Frames dropped because a subscriber queue was full",
        )?;
        let encode_failures = camera_counter(
            "camstream_encode_failures_total",
            "Frames skipped because encoding failed",
        )?;
        let read_failures = camera_counter(
            "camstream_read_failures_total",
            "Device reads that stopped a capture loop",
        )?;
        let compressed_bytes = camera_counter(
            "camstream_compressed_bytes_total",
            "Bytes produced by the codec pipeline",
        )?;
        let active_loops = IntGauge::new(
            "camstream_active_loops",
            "Capture loops currently running",
        )?;

        registry.register(Box::new(frames_captured.clone()))?;
        registry.register(Box::new(frames_published.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(encode_failures.clone()))?;
        registry.register(Box::new(read_failures.clone()))?;
        registry.register(Box::new(compressed_bytes.clone()))?;
        registry.register(Box::new(active_loops.clone()))?;

        Ok(Self {
            registry,
            frames_captured,
            frames_published,
            frames_dropped,
            encode_failures,
            read_failures,
            compressed_bytes,
            active_loops,
        })
    }

    /// Returns counters bound to one camera's label.
    pub fn camera(&self, camera_id: CameraId) -> CameraMetrics {
        let label = camera_id.to_string();
        let labels = [label.as_str()];
        CameraMetrics {
            frames_captured: self.frames_captured.with_label_values(&labels),
            frames_published: self.frames_published.with_label_values(&labels),
            frames_dropped: self.frames_dropped.with_label_values(&labels),
            encode_failures: self.encode_failures.with_label_values(&labels),
            read_failures: self.read_failures.with_label_values(&labels),
            compressed_bytes: self.compressed_bytes.with_label_values(&labels),
            active_loops: self.active_loops.clone(),
        }
    }

    /// Number of capture loops currently running.
    pub fn active_loops(&self) -> i64 {
        self.active_loops.get()
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Counters for a single camera. Cheap to clone.
#[derive(Clone)]
pub struct CameraMetrics {
    frames_captured: IntCounter,
    frames_published: IntCounter,
    frames_dropped: IntCounter,
    encode_failures: IntCounter,
    read_failures: IntCounter,
    compressed_bytes: IntCounter,
    active_loops: IntGauge,
}

impl CameraMetrics {
    pub fn frame_captured(&self) {
        self.frames_captured.inc();
    }

    pub fn frame_encoded(&self, bytes: usize) {
        self.compressed_bytes.inc_by(bytes as u64);
    }

    pub fn frame_published(&self) {
        self.frames_published.inc();
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.inc();
    }

    pub fn encode_failed(&self) {
        self.encode_failures.inc();
    }

    pub fn read_failed(&self) {
        self.read_failures.inc();
    }

    pub fn loop_started(&self) {
        self.active_loops.inc();
    }

    pub fn loop_stopped(&self) {
        self.active_loops.dec();
    }

    pub fn snapshot(&self) -> CameraSnapshot {
        CameraSnapshot {
            frames_captured: self.frames_captured.get(),
            frames_published: self.frames_published.get(),
            frames_dropped: self.frames_dropped.get(),
            encode_failures: self.encode_failures.get(),
            read_failures: self.read_failures.get(),
            compressed_bytes: self.compressed_bytes.get(),
        }
    }
}

impl std::fmt::Debug for CameraMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CameraMetrics").field(&self.snapshot()).finish()
    }
}
