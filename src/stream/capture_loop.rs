//! Per-camera capture → compress → publish loop.

use crate::capture::{CameraConfig, CameraId, DeviceRegistry};
use crate::codec::{CodecPipeline, CompressedFrame};
use crate::metrics::CameraMetrics;
use crate::running::RunningFlag;
use crate::transport::{FrameSink, PublishError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Why a capture loop reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The running flag was cleared.
    Shutdown,
    /// The registry had no device for the camera.
    DeviceMissing,
    /// The device failed to deliver a frame.
    ReadFailed,
    /// The loop thread panicked.
    Panicked,
}

/// One camera's streaming loop.
///
/// Each iteration reads a frame, compresses it and publishes it, then
/// sleeps for one frame interval. Encode failures and backpressure drops
/// skip the frame; a missing device, a read failure or a cleared running
/// flag end the loop. On exit the loop releases its device.
pub struct CaptureLoop {
    camera_id: CameraId,
    registry: Arc<DeviceRegistry>,
    pipeline: CodecPipeline,
    sink: Arc<dyn FrameSink>,
    running: RunningFlag,
    interval: Duration,
    metrics: CameraMetrics,
}

impl CaptureLoop {
    pub fn new(
        camera_id: CameraId,
        config: &CameraConfig,
        registry: Arc<DeviceRegistry>,
        sink: Arc<dyn FrameSink>,
        running: RunningFlag,
        metrics: CameraMetrics,
    ) -> Self {
        Self {
            camera_id,
            registry,
            pipeline: CodecPipeline::from_config(config),
            sink,
            running,
            interval: config.frame_interval(),
            metrics,
        }
    }

    /// Replaces the codec settings derived from the camera config.
    pub fn with_pipeline(mut self, pipeline: CodecPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    /// Runs until a terminal condition, then releases the device.
    pub fn run(self) -> LoopExit {
        let camera_id = self.camera_id;
        self.metrics.loop_started();
        tracing::info!(
            camera_id,
            interval_ms = self.interval.as_millis() as u64,
            "Capture loop started"
        );

        let exit = loop {
            if let Some(exit) = self.step() {
                break exit;
            }
        };

        self.registry.release(camera_id);
        self.metrics.loop_stopped();
        tracing::info!(camera_id, ?exit, stats = ?self.metrics.snapshot(), "Capture loop stopped");
        exit
    }

    /// One iteration. Returns the exit reason once the loop must stop.
    fn step(&self) -> Option<LoopExit> {
        if !self.running.is_running() {
            return Some(LoopExit::Shutdown);
        }

        let Some(device) = self.registry.get(self.camera_id) else {
            tracing::error!(camera_id = self.camera_id, "Camera not initialized");
            return Some(LoopExit::DeviceMissing);
        };

        let frame = match device.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.metrics.read_failed();
                tracing::error!(camera_id = self.camera_id, error = %e, "Frame read failed");
                return Some(LoopExit::ReadFailed);
            }
        };
        self.metrics.frame_captured();

        match self.pipeline.compress(&frame) {
            Ok(compressed) => {
                self.metrics.frame_encoded(compressed.len());
                tracing::debug!(
                    camera_id = self.camera_id,
                    sequence = frame.sequence(),
                    bytes = compressed.len(),
                    "Frame compressed"
                );
                self.deliver(&compressed);
            }
            Err(e) => {
                self.metrics.encode_failed();
                tracing::warn!(camera_id = self.camera_id, error = %e, "Frame skipped");
            }
        }

        if !self.running.sleep(self.interval) {
            return Some(LoopExit::Shutdown);
        }
        None
    }

    fn deliver(&self, frame: &CompressedFrame) {
        match self.sink.publish(frame) {
            Ok(()) => self.metrics.frame_published(),
            Err(PublishError::BackpressureDrop {
                dropped,
                subscribers,
            }) => {
                self.metrics.frame_dropped();
                tracing::warn!(
                    camera_id = self.camera_id,
                    dropped,
                    subscribers,
                    "Queue full, frame dropped"
                );
            }
            Err(e @ PublishError::Closed) => {
                self.metrics.frame_dropped();
                tracing::warn!(camera_id = self.camera_id, error = %e, "Frame dropped");
            }
        }
    }

    /// Runs the loop on a named thread.
    pub fn spawn(self) -> std::io::Result<LoopHandle> {
        let camera_id = self.camera_id;
        let (done_tx, done_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name(format!("capture-{camera_id}"))
            .spawn(move || {
                let exit = self.run();
                let _ = done_tx.send(exit);
                exit
            })?;
        Ok(LoopHandle {
            camera_id,
            thread,
            done: done_rx,
        })
    }
}

/// Handle to a spawned [`CaptureLoop`].
pub struct LoopHandle {
    camera_id: CameraId,
    thread: JoinHandle<LoopExit>,
    done: Receiver<LoopExit>,
}

impl LoopHandle {
    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits up to `timeout` for the loop to stop.
    ///
    /// Gives the handle back if the loop is still running.
    pub fn wait_timeout(self, timeout: Duration) -> Result<LoopExit, LoopHandle> {
        match self.done.recv_timeout(timeout) {
            Ok(exit) => {
                let _ = self.thread.join();
                Ok(exit)
            }
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(self.join()),
        }
    }

    /// Blocks until the loop stops.
    pub fn join(self) -> LoopExit {
        self.thread.join().unwrap_or(LoopExit::Panicked)
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("camera_id", &self.camera_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{
        CameraError, CaptureDevice, DeviceFactory, Frame, SyntheticCamera, SyntheticFactory,
        SyntheticPattern,
    };
    use crate::codec::decode_compressed;
    use crate::metrics::MetricsRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    /// Records published frames and clears the running flag after `limit`.
    struct RecordingSink {
        frames: Mutex<Vec<CompressedFrame>>,
        limit: usize,
        running: RunningFlag,
        always_full: bool,
    }

    impl RecordingSink {
        fn new(limit: usize, running: &RunningFlag) -> Self {
            Self {
                frames: Mutex::new(Vec::new()),
                limit,
                running: running.clone(),
                always_full: false,
            }
        }

        fn full(limit: usize, running: &RunningFlag) -> Self {
            Self {
                always_full: true,
                ..Self::new(limit, running)
            }
        }

        fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    impl FrameSink for RecordingSink {
        fn publish(&self, frame: &CompressedFrame) -> Result<(), PublishError> {
            let mut frames = self.frames.lock().unwrap();
            frames.push(frame.clone());
            if frames.len() >= self.limit {
                self.running.stop();
            }
            if self.always_full {
                return Err(PublishError::BackpressureDrop {
                    dropped: 1,
                    subscribers: 1,
                });
            }
            Ok(())
        }
    }

    fn config(fps: u32) -> CameraConfig {
        CameraConfig {
            width: 64,
            height: 48,
            fps,
            jpeg_quality: 80,
            zlib_level: 1,
        }
    }

    fn setup(
        factory: impl DeviceFactory + 'static,
        config: &CameraConfig,
    ) -> (Arc<DeviceRegistry>, MetricsRegistry) {
        let registry = Arc::new(DeviceRegistry::new(factory));
        registry.open(0, config).unwrap();
        (registry, MetricsRegistry::new().unwrap())
    }

    #[test]
    fn test_publishes_until_shutdown() {
        let config = config(100);
        let (registry, metrics) = setup(SyntheticFactory::default(), &config);
        let running = RunningFlag::new();
        let sink = Arc::new(RecordingSink::new(5, &running));

        let exit = CaptureLoop::new(
            0,
            &config,
            Arc::clone(&registry),
            sink.clone(),
            running,
            metrics.camera(0),
        )
        .run();

        assert_eq!(exit, LoopExit::Shutdown);
        assert_eq!(sink.count(), 5);
        assert!(!registry.contains(0), "device must be released on exit");

        let snapshot = metrics.camera(0).snapshot();
        assert_eq!(snapshot.frames_captured, 5);
        assert_eq!(snapshot.frames_published, 5);
        assert_eq!(metrics.active_loops(), 0);

        for frame in sink.frames.lock().unwrap().iter() {
            let decoded = decode_compressed(frame.as_bytes()).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (64, 48));
        }
    }

    #[test]
    fn test_missing_device_stops_loop() {
        let config = config(100);
        let registry = Arc::new(DeviceRegistry::new(SyntheticFactory::default()));
        let running = RunningFlag::new();
        let sink = Arc::new(RecordingSink::new(usize::MAX, &running));
        let metrics = MetricsRegistry::new().unwrap();

        let exit = CaptureLoop::new(0, &config, registry, sink.clone(), running, metrics.camera(0))
            .run();

        assert_eq!(exit, LoopExit::DeviceMissing);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_read_failure_stops_loop() {
        let config = config(100);
        let (registry, metrics) = setup(SyntheticFactory::default().failing_after(3), &config);
        let running = RunningFlag::new();
        let sink = Arc::new(RecordingSink::new(usize::MAX, &running));

        let exit = CaptureLoop::new(
            0,
            &config,
            Arc::clone(&registry),
            sink.clone(),
            running.clone(),
            metrics.camera(0),
        )
        .run();

        assert_eq!(exit, LoopExit::ReadFailed);
        assert_eq!(sink.count(), 3);
        assert!(running.is_running(), "one loop's failure is not a shutdown");
        assert!(!registry.contains(0));
        assert_eq!(metrics.camera(0).snapshot().read_failures, 1);
    }

    /// Emits a malformed frame every other read.
    struct FlakyFactory;

    struct FlakyCamera {
        inner: SyntheticCamera,
        reads: AtomicUsize,
    }

    impl CaptureDevice for FlakyCamera {
        fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
            self.inner.open(config)
        }

        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            let frame = self.inner.read_frame()?;
            if self.reads.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                return Ok(Frame::new(vec![0u8; 3], frame.width(), frame.height(), 0));
            }
            Ok(frame)
        }

        fn is_open(&self) -> bool {
            self.inner.is_open()
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    impl DeviceFactory for FlakyFactory {
        fn create(&self, _: CameraId) -> Result<Box<dyn CaptureDevice>, CameraError> {
            Ok(Box::new(FlakyCamera {
                inner: SyntheticCamera::new(SyntheticPattern::Gradient),
                reads: AtomicUsize::new(0),
            }))
        }
    }

    #[test]
    fn test_encode_failure_skips_frame() {
        let config = config(100);
        let (registry, metrics) = setup(FlakyFactory, &config);
        let running = RunningFlag::new();
        let sink = Arc::new(RecordingSink::new(3, &running));

        let exit =
            CaptureLoop::new(0, &config, registry, sink.clone(), running, metrics.camera(0)).run();

        assert_eq!(exit, LoopExit::Shutdown);
        assert_eq!(sink.count(), 3);
        let snapshot = metrics.camera(0).snapshot();
        assert_eq!(snapshot.frames_captured, 5);
        assert_eq!(snapshot.encode_failures, 2);
    }

    #[test]
    fn test_backpressure_never_stalls_loop() {
        let config = config(50);
        let (registry, metrics) = setup(SyntheticFactory::default(), &config);
        let running = RunningFlag::new();
        let iterations = 10;
        let sink = Arc::new(RecordingSink::full(iterations, &running));

        let start = Instant::now();
        let exit =
            CaptureLoop::new(0, &config, registry, sink.clone(), running, metrics.camera(0)).run();
        let elapsed = start.elapsed();

        assert_eq!(exit, LoopExit::Shutdown);
        let snapshot = metrics.camera(0).snapshot();
        assert_eq!(snapshot.frames_dropped, iterations as u64);
        assert_eq!(snapshot.frames_published, 0);
        // Ten 20ms intervals plus encode time; a blocked publish would blow this.
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    }

    #[test]
    fn test_spawned_loop_stops_within_one_interval() {
        let config = config(5);
        let (registry, metrics) = setup(SyntheticFactory::default(), &config);
        let running = RunningFlag::new();
        let sink = Arc::new(RecordingSink::new(usize::MAX, &running));

        let handle = CaptureLoop::new(
            0,
            &config,
            Arc::clone(&registry),
            sink,
            running.clone(),
            metrics.camera(0),
        )
        .spawn()
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        running.stop();
        let exit = handle
            .wait_timeout(config.frame_interval() + Duration::from_millis(100))
            .expect("loop did not stop within one interval");

        assert_eq!(exit, LoopExit::Shutdown);
        assert!(registry.is_empty());
    }
}
