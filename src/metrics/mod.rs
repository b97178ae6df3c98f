//! Prometheus metrics for the streaming pipeline.
//!
//! Every capture loop reports through a [`CameraMetrics`] handle bound to
//! its camera label. With the `metrics` feature the registry is served
//! over HTTP.
//!
//! # Metrics Exposed
//!
//! ## Per camera (label `camera`)
//! - `camstream_frames_captured_total` - Frames read from the device
//! - `camstream_frames_published_total` - Frames accepted by every subscriber queue
//! - `camstream_frames_dropped_total` - Frames dropped by backpressure
//! - `camstream_encode_failures_total` - Frames skipped by the codec
//! - `camstream_read_failures_total` - Device read failures
//! - `camstream_compressed_bytes_total` - Codec output volume
//!
//! ## Process
//! - `camstream_active_loops` - Capture loops currently running
//!
//! # Example
//!
//! ```no_run
//! use camstream::metrics::MetricsRegistry;
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! let camera = registry.camera(0);
//! camera.frame_captured();
//! camera.frame_dropped();
//!
//! println!("{}", registry.encode().unwrap());
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{CameraMetrics, CameraSnapshot, MetricsError, MetricsRegistry};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
