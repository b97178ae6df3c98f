//! Frame distribution over TCP.
//!
//! Two delivery modes share one framing format (see [`wire`]):
//!
//! - **pub/sub**: a [`FramePublisher`] fans every frame out to all
//!   connected [`Subscriber`]s. Each subscriber has a small bounded queue.
//!   When it is full the frame is dropped for that subscriber instead of
//!   delaying the capture loop, since a late frame is worth less than the
//!   next one.
//! - **request/response**: a [`FrameResponder`] answers each request from a
//!   [`FrameRequester`] with a size header and one freshly captured frame.
//!
//! Payloads carry no sequence numbers, timestamps or camera ids. Cameras
//! are told apart by port.
//!
//! The framing is plain TCP with little-endian length prefixes. It is not
//! the ZeroMQ wire protocol (ZMTP), so ZeroMQ SUB or REQ sockets cannot
//! connect to these endpoints; use [`Subscriber`] and [`FrameRequester`].

mod publisher;
mod reqrep;
mod subscriber;
pub mod wire;

pub use publisher::FramePublisher;
pub use reqrep::{FrameProvider, FrameRequester, FrameResponder};
pub use subscriber::Subscriber;
pub use wire::FrameHeader;

use crate::codec::CompressedFrame;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by transport endpoints.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("message of {0} bytes exceeds the size limit")]
    MessageTooLarge(usize),
    #[error("frame header must be 8 bytes, got {0}")]
    InvalidHeader(usize),
    #[error("requests must not be empty")]
    EmptyRequest,
    #[error("previous response has not been fully read")]
    RequestInFlight,
    #[error("no response part is pending")]
    OutOfSequence,
    #[error("connection closed by peer")]
    Closed,
}

/// Outcome of a publish attempt that did not reach every subscriber.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Outbound queues were full; the frame was discarded for those
    /// subscribers and delivered to the rest.
    #[error("queue full, frame dropped for {dropped} of {subscribers} subscribers")]
    BackpressureDrop { dropped: usize, subscribers: usize },
    #[error("publisher is shut down")]
    Closed,
}

/// Destination for compressed frames. Implementations must never block.
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: &CompressedFrame) -> Result<(), PublishError>;
}

impl<S: FrameSink + ?Sized> FrameSink for Arc<S> {
    fn publish(&self, frame: &CompressedFrame) -> Result<(), PublishError> {
        (**self).publish(frame)
    }
}
