//! Camera Streaming Library
//!
//! Captures live video from one or more cameras, compresses every frame
//! (JPEG, then zlib) and distributes it to remote subscribers over TCP.
//!
//! # Architecture
//!
//! Each camera runs on its own capture loop thread:
//!
//! ```text
//! capture (registry) → codec → transport (publisher)
//!         ↑                           ↓
//!      stream (coordinator)        network
//! ```
//!
//! A pull endpoint can additionally serve one fresh frame per request.
//!
//! # Design Principles
//!
//! - **Drop, never stall**: a full subscriber queue loses the frame instead
//!   of delaying capture
//! - **One owner per device**: the registry opens each camera once and
//!   closes it once
//! - **Cooperative shutdown**: loops poll a shared [`RunningFlag`]
//!
//! # Example
//!
//! ```no_run
//! use camstream::{
//!     capture::{FileConfig, SyntheticFactory},
//!     metrics::MetricsRegistry,
//!     stream::StreamServer,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let metrics = Arc::new(MetricsRegistry::new().unwrap());
//! let mut server =
//!     StreamServer::new(FileConfig::default(), SyntheticFactory::default(), metrics).unwrap();
//!
//! let report = server.start().unwrap();
//! println!("streaming cameras {:?}", report.started);
//!
//! std::thread::sleep(Duration::from_secs(5));
//! server.shutdown(Duration::from_secs(2));
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod codec;
pub mod error;
pub mod metrics;
pub mod running;
pub mod stream;
pub mod transport;

// Re-export commonly used types at crate root
pub use capture::{CameraConfig, CameraId, DeviceRegistry, FileConfig, Frame};
pub use codec::{CodecPipeline, CompressedFrame};
pub use error::StreamError;
pub use running::RunningFlag;
pub use stream::{CaptureLoop, StreamServer};
pub use transport::{FramePublisher, FrameRequester, FrameResponder, Subscriber};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
