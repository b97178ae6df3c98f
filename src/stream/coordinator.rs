//! Top-level coordinator: owns the registry, the publishers and every loop.

use super::capture_loop::{CaptureLoop, LoopExit, LoopHandle};
use super::pull::RegistryFrameProvider;
use crate::capture::{CameraError, CameraId, DeviceFactory, DeviceRegistry, FileConfig};
use crate::codec::CodecPipeline;
use crate::error::StreamError;
use crate::metrics::MetricsRegistry;
use crate::running::RunningFlag;
use crate::transport::{FramePublisher, FrameResponder, FrameSink};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Extra time given to the responder after the loop deadline.
const RESPONDER_GRACE: Duration = Duration::from_millis(200);

/// Outcome of [`StreamServer::start`].
#[derive(Debug, Default)]
pub struct StartReport {
    /// Cameras whose capture loop is running.
    pub started: Vec<CameraId>,
    /// Cameras that could not be opened. They are not streamed.
    pub failed: Vec<(CameraId, CameraError)>,
    /// Address of the pull endpoint, if one was configured and started.
    pub responder: Option<SocketAddr>,
}

/// Outcome of [`StreamServer::shutdown`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Loops that reached their terminal state, with the reason.
    pub stopped: Vec<(CameraId, LoopExit)>,
    /// Loops still blocked when the deadline passed. Their entries were
    /// removed anyway; each device closes as soon as its blocked read
    /// returns.
    pub timed_out: Vec<CameraId>,
}

struct Responder {
    addr: SocketAddr,
    thread: JoinHandle<u64>,
}

/// Runs one capture loop per configured camera.
///
/// Cameras configured on the same non-zero port share one publisher.
/// Port 0 always binds a fresh ephemeral port.
pub struct StreamServer {
    config: FileConfig,
    registry: Arc<DeviceRegistry>,
    metrics: Arc<MetricsRegistry>,
    running: RunningFlag,
    sinks: HashMap<CameraId, Arc<FramePublisher>>,
    loops: HashMap<CameraId, LoopHandle>,
    finished: Vec<(CameraId, LoopExit)>,
    responder: Option<Responder>,
    shut_down: bool,
}

impl StreamServer {
    /// Validates `config` and creates an idle server.
    pub fn new(
        config: FileConfig,
        factory: impl DeviceFactory + 'static,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Arc::new(DeviceRegistry::new(factory)),
            metrics,
            running: RunningFlag::new(),
            sinks: HashMap::new(),
            loops: HashMap::new(),
            finished: Vec::new(),
            responder: None,
            shut_down: false,
        })
    }

    /// The flag every loop observes. Clearing it stops the server.
    pub fn running_flag(&self) -> RunningFlag {
        self.running.clone()
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    /// Opens every configured camera and starts its loop.
    ///
    /// A camera that fails to open is reported and skipped. Bind failures
    /// and thread spawn failures abort the start.
    pub fn start(&mut self) -> Result<StartReport, StreamError> {
        if self.shut_down {
            return Err(StreamError::ShutDown);
        }
        let mut report = StartReport::default();

        let streams = self.config.streams.clone();
        for entry in streams {
            if self.loops.contains_key(&entry.camera_id) {
                continue;
            }
            match self.start_stream(entry.camera_id, entry.port) {
                Ok(()) => report.started.push(entry.camera_id),
                Err(StreamError::Camera(e)) => {
                    tracing::warn!(camera_id = entry.camera_id, error = %e, "Camera not started");
                    report.failed.push((entry.camera_id, e));
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(pull) = self.config.pull.clone() {
            if self.responder.is_none() {
                match self.start_responder(pull.camera_id, pull.port) {
                    Ok(addr) => report.responder = Some(addr),
                    Err(StreamError::Camera(e)) => {
                        tracing::warn!(
                            camera_id = pull.camera_id,
                            error = %e,
                            "Pull endpoint not started"
                        );
                        report.failed.push((pull.camera_id, e));
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!(
            started = report.started.len(),
            failed = report.failed.len(),
            pull = report.responder.is_some(),
            "Stream server started"
        );
        Ok(report)
    }

    fn start_stream(&mut self, camera_id: CameraId, port: u16) -> Result<(), StreamError> {
        self.registry.open(camera_id, &self.config.camera)?;

        let publisher = match self.publisher_for(camera_id, port) {
            Ok(publisher) => publisher,
            Err(e) => {
                self.registry.release(camera_id);
                return Err(e);
            }
        };
        self.sinks.insert(camera_id, Arc::clone(&publisher));
        self.spawn_loop(camera_id, publisher)
    }

    fn publisher_for(
        &self,
        camera_id: CameraId,
        port: u16,
    ) -> Result<Arc<FramePublisher>, StreamError> {
        if let Some(publisher) = self.sinks.get(&camera_id) {
            return Ok(Arc::clone(publisher));
        }
        if port != 0 {
            let shared = self
                .sinks
                .values()
                .find(|publisher| publisher.local_addr().port() == port);
            if let Some(publisher) = shared {
                return Ok(Arc::clone(publisher));
            }
        }
        let addr = format!("{}:{}", self.config.transport.bind_host, port);
        let publisher = FramePublisher::bind(addr, self.config.transport.send_hwm)?;
        Ok(Arc::new(publisher))
    }

    fn spawn_loop(
        &mut self,
        camera_id: CameraId,
        publisher: Arc<FramePublisher>,
    ) -> Result<(), StreamError> {
        let sink: Arc<dyn FrameSink> = publisher;
        let handle = CaptureLoop::new(
            camera_id,
            &self.config.camera,
            Arc::clone(&self.registry),
            sink,
            self.running.clone(),
            self.metrics.camera(camera_id),
        )
        .spawn()
        .map_err(|e| {
            self.registry.release(camera_id);
            StreamError::Spawn(e)
        })?;
        self.loops.insert(camera_id, handle);
        Ok(())
    }

    fn start_responder(
        &mut self,
        camera_id: CameraId,
        port: u16,
    ) -> Result<SocketAddr, StreamError> {
        self.registry.open(camera_id, &self.config.camera)?;

        let addr = format!("{}:{}", self.config.transport.bind_host, port);
        let responder = FrameResponder::bind(addr)?;
        let local_addr = responder.local_addr();
        let provider = RegistryFrameProvider::new(
            camera_id,
            Arc::clone(&self.registry),
            CodecPipeline::from_config(&self.config.camera),
            self.metrics.camera(camera_id),
        );
        let thread = responder
            .spawn(Arc::new(provider), self.running.clone())
            .map_err(StreamError::Spawn)?;

        self.responder = Some(Responder {
            addr: local_addr,
            thread,
        });
        Ok(local_addr)
    }

    /// Address of the publisher serving `camera_id`.
    pub fn publisher_addr(&self, camera_id: CameraId) -> Option<SocketAddr> {
        self.sinks.get(&camera_id).map(|p| p.local_addr())
    }

    /// Address of the pull endpoint.
    pub fn responder_addr(&self) -> Option<SocketAddr> {
        self.responder.as_ref().map(|r| r.addr)
    }

    /// Cameras whose loop has not yet been reaped.
    pub fn active_cameras(&self) -> Vec<CameraId> {
        let mut cameras: Vec<CameraId> = self.loops.keys().copied().collect();
        cameras.sort_unstable();
        cameras
    }

    /// Joins loops that stopped on their own and returns why they stopped.
    pub fn reap_finished(&mut self) -> Vec<(CameraId, LoopExit)> {
        let done: Vec<CameraId> = self
            .loops
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        let mut reaped = Vec::with_capacity(done.len());
        for camera_id in done {
            if let Some(handle) = self.loops.remove(&camera_id) {
                let exit = handle.join();
                if exit != LoopExit::Shutdown {
                    tracing::warn!(camera_id, ?exit, "Capture loop ended");
                }
                reaped.push((camera_id, exit));
            }
        }
        self.finished.extend(reaped.iter().copied());
        reaped
    }

    /// Reopens a configured camera whose loop has stopped and starts a new
    /// loop on the same publisher.
    pub fn restart(&mut self, camera_id: CameraId) -> Result<(), StreamError> {
        if self.shut_down || !self.running.is_running() {
            return Err(StreamError::ShutDown);
        }
        self.reap_finished();
        if self.loops.contains_key(&camera_id) {
            return Err(StreamError::AlreadyRunning(camera_id));
        }
        let port = self
            .config
            .streams
            .iter()
            .find(|entry| entry.camera_id == camera_id)
            .map(|entry| entry.port)
            .ok_or(StreamError::UnknownCamera(camera_id))?;

        self.start_stream(camera_id, port)?;
        tracing::info!(camera_id, "Capture loop restarted");
        Ok(())
    }

    /// Stops every loop, releases every device and closes every endpoint.
    ///
    /// Loops get until `timeout` to exit. Devices of loops that miss the
    /// deadline are released regardless, without waiting on their reads,
    /// so the call returns shortly after `timeout`. Calling this twice is
    /// a no-op.
    pub fn shutdown(&mut self, timeout: Duration) -> ShutdownReport {
        if self.shut_down {
            return ShutdownReport::default();
        }
        self.shut_down = true;
        self.running.stop();
        tracing::info!("Shutting down stream server");

        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport {
            stopped: std::mem::take(&mut self.finished),
            timed_out: Vec::new(),
        };

        let mut loops: Vec<(CameraId, LoopHandle)> = self.loops.drain().collect();
        loops.sort_unstable_by_key(|(id, _)| *id);
        for (camera_id, handle) in loops {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match handle.wait_timeout(remaining) {
                Ok(exit) => report.stopped.push((camera_id, exit)),
                Err(_detached) => {
                    tracing::warn!(camera_id, "Capture loop did not stop in time");
                    report.timed_out.push(camera_id);
                }
            }
        }

        self.registry.release_all();

        if let Some(responder) = self.responder.take() {
            let grace = deadline.max(Instant::now() + RESPONDER_GRACE);
            while !responder.thread.is_finished() && Instant::now() < grace {
                thread::sleep(Duration::from_millis(10));
            }
            if responder.thread.is_finished() {
                let served = responder.thread.join().unwrap_or(0);
                tracing::info!(served, "Pull endpoint stopped");
            } else {
                tracing::warn!(addr = %responder.addr, "Pull endpoint did not stop in time");
            }
        }

        for publisher in self.sinks.values() {
            publisher.shutdown();
        }
        self.sinks.clear();

        tracing::info!(
            stopped = report.stopped.len(),
            timed_out = report.timed_out.len(),
            "Stream server stopped"
        );
        report
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CameraConfig, PullConfig, StreamEntry, SyntheticFactory};
    use crate::transport::{FrameRequester, Subscriber};

    fn config(streams: &[(CameraId, u16)]) -> FileConfig {
        let mut config = FileConfig::default();
        config.camera = CameraConfig {
            width: 64,
            height: 48,
            fps: 50,
            jpeg_quality: 80,
            zlib_level: 1,
        };
        config.transport.bind_host = "127.0.0.1".to_string();
        config.streams = streams
            .iter()
            .map(|&(camera_id, port)| StreamEntry { camera_id, port })
            .collect();
        config
    }

    fn server(config: FileConfig, factory: SyntheticFactory) -> StreamServer {
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        StreamServer::new(config, factory, metrics).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config(&[(0, 0)]);
        config.camera.fps = 0;
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        assert!(matches!(
            StreamServer::new(config, SyntheticFactory::default(), metrics),
            Err(StreamError::Config(_))
        ));
    }

    #[test]
    fn test_unopenable_camera_is_skipped() {
        let mut server = server(config(&[(0, 0), (-1, 0)]), SyntheticFactory::default());
        let report = server.start().unwrap();

        assert_eq!(report.started, vec![0]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, -1);
        assert!(matches!(report.failed[0].1, CameraError::DeviceOpenFailed { .. }));
        assert!(server.publisher_addr(-1).is_none());
        assert!(!server.registry().contains(-1));

        let report = server.shutdown(Duration::from_secs(1));
        assert_eq!(report.stopped, vec![(0, LoopExit::Shutdown)]);
        assert!(report.timed_out.is_empty());
        assert!(server.registry().is_empty());
    }

    #[test]
    fn test_streams_to_subscriber() {
        let mut server = server(config(&[(0, 0)]), SyntheticFactory::default());
        server.start().unwrap();
        let addr = server.publisher_addr(0).unwrap();

        let mut subscriber = Subscriber::connect(addr).unwrap();
        let frame = subscriber
            .recv_timeout(Duration::from_secs(2))
            .unwrap()
            .expect("no frame within 2s");
        let decoded = crate::codec::decode_compressed(frame.as_bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_reap_and_restart_after_read_failure() {
        let mut server = server(
            config(&[(0, 0)]),
            SyntheticFactory::default().failing_after(5),
        );
        server.start().unwrap();
        let addr = server.publisher_addr(0).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut reaped = Vec::new();
        while reaped.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
            reaped = server.reap_finished();
        }
        assert_eq!(reaped, vec![(0, LoopExit::ReadFailed)]);
        assert!(!server.registry().contains(0));

        server.restart(0).unwrap();
        assert_eq!(server.publisher_addr(0), Some(addr));
        assert!(matches!(server.restart(0), Err(StreamError::AlreadyRunning(0))));
        assert!(matches!(server.restart(7), Err(StreamError::UnknownCamera(7))));
    }

    #[test]
    fn test_pull_endpoint() {
        let mut config = config(&[]);
        config.pull = Some(PullConfig {
            camera_id: 0,
            port: 0,
        });
        let mut server = server(config, SyntheticFactory::default());
        let report = server.start().unwrap();
        let addr = report.responder.unwrap();
        assert_eq!(server.responder_addr(), Some(addr));

        let mut requester = FrameRequester::connect(addr).unwrap();
        requester
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let (header, frame) = requester.request_frame().unwrap();
        assert_eq!((header.rows, header.cols), (48, 64));
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut server = server(config(&[(0, 0), (1, 0)]), SyntheticFactory::default());
        server.start().unwrap();

        let first = server.shutdown(Duration::from_secs(1));
        assert_eq!(first.stopped.len(), 2);
        assert_eq!(server.shutdown(Duration::from_secs(1)), ShutdownReport::default());
        assert!(matches!(server.start(), Err(StreamError::ShutDown)));
    }
}
