//! Pub/sub receiving side.

use super::{wire, TransportError};
use crate::codec::CompressedFrame;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Connection to a [`FramePublisher`](super::FramePublisher).
pub struct Subscriber {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Subscriber {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        tracing::debug!(%peer, "Subscribed");
        Ok(Self { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Blocks until the next frame arrives.
    pub fn recv(&mut self) -> Result<CompressedFrame, TransportError> {
        wire::read_message(&mut self.stream).map(CompressedFrame::new)
    }

    /// Waits up to `timeout` for a frame to start arriving.
    ///
    /// Returns `Ok(None)` if nothing arrived; once a frame has started it
    /// is read to completion.
    pub fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<CompressedFrame>, TransportError> {
        if !wire::wait_readable(&self.stream, timeout)? {
            return Ok(None);
        }
        self.recv().map(Some)
    }
}
