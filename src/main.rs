//! Camera Streaming Server CLI
//!
//! Publishes one or more cameras over TCP pub/sub and, optionally, serves
//! frames on demand from a pull endpoint.

use camstream::{
    capture::{
        CameraId, DeviceFactory, FileConfig, PullConfig, StreamEntry, SyntheticFactory,
        SyntheticPattern,
    },
    metrics::MetricsRegistry,
    stream::{LoopExit, StreamServer},
    RunningFlag, StreamError,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How often the main thread checks for stopped loops.
const REAP_INTERVAL: Duration = Duration::from_millis(500);
/// Time capture loops get to stop after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "camstream", version, about = "Stream compressed camera frames over TCP")]
struct Cli {
    /// TOML configuration file. Flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera to publish, as CAMERA_ID:PORT. Repeat for more cameras.
    #[arg(short, long = "stream", value_parser = parse_stream)]
    streams: Vec<StreamEntry>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    fps: Option<u32>,

    /// JPEG quality (0-100).
    #[arg(long)]
    jpeg_quality: Option<u8>,

    /// zlib level (0-9).
    #[arg(long)]
    zlib_level: Option<u32>,

    /// Frames queued per subscriber before new frames are dropped.
    #[arg(long)]
    send_hwm: Option<usize>,

    /// Interface to bind every endpoint on.
    #[arg(long)]
    bind_host: Option<String>,

    /// Camera served by the pull endpoint.
    #[arg(long, requires = "pull_port")]
    pull_camera: Option<CameraId>,

    /// Port of the request/response pull endpoint.
    #[arg(long)]
    pull_port: Option<u16>,

    /// Prometheus metrics port (0 disables).
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Use generated frames instead of camera hardware.
    #[arg(long)]
    synthetic: bool,
}

fn parse_stream(s: &str) -> Result<StreamEntry, String> {
    let (camera, port) = s
        .split_once(':')
        .ok_or_else(|| format!("expected CAMERA_ID:PORT, got '{s}'"))?;
    let camera_id = camera
        .trim()
        .parse()
        .map_err(|e| format!("invalid camera id '{camera}': {e}"))?;
    let port = port
        .trim()
        .parse()
        .map_err(|e| format!("invalid port '{port}': {e}"))?;
    Ok(StreamEntry { camera_id, port })
}

impl Cli {
    fn into_config(self) -> Result<(FileConfig, bool), StreamError> {
        let mut config = match &self.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };

        if !self.streams.is_empty() {
            config.streams = self.streams;
        }
        if let Some(width) = self.width {
            config.camera.width = width;
        }
        if let Some(height) = self.height {
            config.camera.height = height;
        }
        if let Some(fps) = self.fps {
            config.camera.fps = fps;
        }
        if let Some(quality) = self.jpeg_quality {
            config.camera.jpeg_quality = quality;
        }
        if let Some(level) = self.zlib_level {
            config.camera.zlib_level = level;
        }
        if let Some(hwm) = self.send_hwm {
            config.transport.send_hwm = hwm;
        }
        if let Some(host) = self.bind_host {
            config.transport.bind_host = host;
        }
        if let Some(port) = self.pull_port {
            let camera_id = self
                .pull_camera
                .or(config.pull.as_ref().map(|p| p.camera_id))
                .unwrap_or(0);
            config.pull = Some(PullConfig { camera_id, port });
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }

        config.validate()?;
        Ok((config, self.synthetic))
    }
}

#[cfg(feature = "camera")]
fn device_factory(synthetic: bool) -> Box<dyn DeviceFactory> {
    if synthetic {
        Box::new(SyntheticFactory::new(SyntheticPattern::Gradient))
    } else {
        Box::new(camstream::capture::NokhwaFactory)
    }
}

#[cfg(not(feature = "camera"))]
fn device_factory(synthetic: bool) -> Box<dyn DeviceFactory> {
    if !synthetic {
        warn!("Built without the `camera` feature, streaming synthetic frames");
    }
    Box::new(SyntheticFactory::new(SyntheticPattern::Gradient))
}

#[cfg(feature = "metrics")]
fn start_metrics(
    port: u16,
    registry: &Arc<MetricsRegistry>,
    running: RunningFlag,
) -> Option<std::thread::JoinHandle<()>> {
    use camstream::metrics::{MetricsServer, MetricsServerConfig};

    if port == 0 {
        return None;
    }
    let server = MetricsServer::new(MetricsServerConfig::with_port(port), Arc::clone(registry));
    match server.spawn(running) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to start metrics server");
            None
        }
    }
}

#[cfg(not(feature = "metrics"))]
fn start_metrics(
    _port: u16,
    _registry: &Arc<MetricsRegistry>,
    _running: RunningFlag,
) -> Option<std::thread::JoinHandle<()>> {
    None
}

fn run(cli: Cli) -> Result<(), StreamError> {
    let (config, synthetic) = cli.into_config()?;
    let metrics_port = config.metrics.port;
    let registry = Arc::new(MetricsRegistry::new()?);

    let mut server = StreamServer::new(config, device_factory(synthetic), Arc::clone(&registry))?;
    let running = server.running_flag();

    if let Err(e) = ctrlc::set_handler({
        let running = running.clone();
        move || {
            info!("Received Ctrl+C, shutting down");
            running.stop();
        }
    }) {
        warn!(error = %e, "Failed to install Ctrl+C handler");
    }

    let metrics_thread = start_metrics(metrics_port, &registry, running.clone());

    let report = server.start()?;
    for camera_id in &report.started {
        if let Some(addr) = server.publisher_addr(*camera_id) {
            info!(camera_id, %addr, "Publishing");
        }
    }
    if let Some(addr) = report.responder {
        info!(%addr, "Serving pull requests");
    }
    if report.started.is_empty() && report.responder.is_none() {
        warn!("No camera could be opened");
    }

    while running.sleep(REAP_INTERVAL) {
        for (camera_id, exit) in server.reap_finished() {
            if exit != LoopExit::Shutdown {
                warn!(camera_id, ?exit, "Camera stopped streaming");
            }
        }
        if server.active_cameras().is_empty() && server.responder_addr().is_none() {
            info!("Nothing left to stream");
            break;
        }
    }

    let report = server.shutdown(SHUTDOWN_TIMEOUT);
    if !report.timed_out.is_empty() {
        warn!(cameras = ?report.timed_out, "Some capture loops did not stop in time");
    }
    if let Some(handle) = metrics_thread {
        let _ = handle.join();
    }
    for entry in &server.config().streams {
        let stats = registry.camera(entry.camera_id).snapshot();
        info!(camera_id = entry.camera_id, ?stats, "Final counters");
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("camstream v{}", camstream::VERSION);

    if let Err(e) = run(Cli::parse()) {
        eprintln!("camstream: {e}");
        std::process::exit(1);
    }
}
