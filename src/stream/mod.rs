//! Streaming orchestration.
//!
//! A [`StreamServer`] opens the configured cameras, runs one
//! [`CaptureLoop`] thread per camera and, optionally, a pull endpoint
//! backed by a [`RegistryFrameProvider`].
//!
//! ```text
//! DeviceRegistry → CaptureLoop → CodecPipeline → FramePublisher → network
//! ```

mod capture_loop;
mod coordinator;
mod pull;

pub use capture_loop::{CaptureLoop, LoopExit, LoopHandle};
pub use coordinator::{ShutdownReport, StartReport, StreamServer};
pub use pull::RegistryFrameProvider;
