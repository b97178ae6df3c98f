//! Pull-based request/response delivery.
//!
//! The responder serves one client connection at a time and one request
//! at a time. Every non-empty request is answered with two parts:
//!
//! ```text
//! part 1: rows: i32 LE | cols: i32 LE   (8 bytes)
//! part 2: compressed frame
//! ```
//!
//! Requests pipelined on one connection are answered strictly in arrival
//! order. [`FrameRequester`] refuses to send a new request until both
//! parts of the previous response have been read.

use super::wire::{self, FrameHeader};
use super::TransportError;
use crate::codec::CompressedFrame;
use crate::error::StreamError;
use crate::running::RunningFlag;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often idle waits re-check the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Produces one frame per request.
pub trait FrameProvider: Send + Sync {
    fn next_frame(&self) -> Result<(FrameHeader, CompressedFrame), StreamError>;
}

/// Request/response endpoint bound to one port.
pub struct FrameResponder {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl FrameResponder {
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self, TransportError> {
        let bind_err = |source: io::Error| TransportError::Bind {
            addr: format!("{addr:?}"),
            source,
        };
        let listener = TcpListener::bind(&addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        tracing::info!(addr = %local_addr, "Responder bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves clients until `running` is cleared. Returns the number of
    /// requests answered.
    pub fn serve(&self, provider: &dyn FrameProvider, running: &RunningFlag) -> u64 {
        let mut served = 0;
        while running.is_running() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "Pull client connected");
                    match serve_client(&stream, provider, running, &mut served) {
                        Ok(()) => tracing::info!(%peer, "Pull client disconnected"),
                        Err(e) => tracing::warn!(%peer, error = %e, "Pull client dropped"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
        served
    }

    /// Runs [`serve`](Self::serve) on its own thread.
    pub fn spawn(
        self,
        provider: Arc<dyn FrameProvider>,
        running: RunningFlag,
    ) -> io::Result<JoinHandle<u64>> {
        thread::Builder::new()
            .name(format!("responder-{}", self.local_addr.port()))
            .spawn(move || self.serve(provider.as_ref(), &running))
    }
}

fn serve_client(
    stream: &TcpStream,
    provider: &dyn FrameProvider,
    running: &RunningFlag,
    served: &mut u64,
) -> Result<(), StreamError> {
    stream.set_nonblocking(false).map_err(TransportError::Io)?;
    stream.set_nodelay(true).map_err(TransportError::Io)?;
    let mut reader = stream;
    let mut writer = stream;

    loop {
        // Wait for the next request without consuming it.
        loop {
            if !running.is_running() {
                return Ok(());
            }
            match wire::wait_readable(stream, POLL_INTERVAL) {
                Ok(true) => break,
                Ok(false) => continue,
                Err(TransportError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }

        let request = match wire::read_message(&mut reader) {
            Ok(request) => request,
            Err(TransportError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if request.is_empty() {
            return Err(TransportError::EmptyRequest.into());
        }

        let (header, frame) = provider.next_frame()?;
        wire::write_message(&mut writer, &header.to_bytes())?;
        wire::write_message(&mut writer, frame.as_bytes())?;
        *served += 1;
        tracing::debug!(
            rows = header.rows,
            cols = header.cols,
            bytes = frame.len(),
            "Frame served"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Idle,
    AwaitingHeader,
    AwaitingFrame(FrameHeader),
}

/// Client for a [`FrameResponder`].
///
/// Enforces strict alternation: send a request, read the header, read the
/// frame. Out-of-order calls fail without touching the socket.
pub struct FrameRequester {
    stream: TcpStream,
    state: RequestState,
}

impl FrameRequester {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            state: RequestState::Idle,
        })
    }

    /// Bounds how long each receive may block.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Returns true if a response is still being read.
    pub fn in_flight(&self) -> bool {
        self.state != RequestState::Idle
    }

    /// Sends a request. The payload content is ignored by the responder.
    pub fn send_request(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.state != RequestState::Idle {
            return Err(TransportError::RequestInFlight);
        }
        if payload.is_empty() {
            return Err(TransportError::EmptyRequest);
        }
        wire::write_message(&mut self.stream, payload)?;
        self.state = RequestState::AwaitingHeader;
        Ok(())
    }

    /// Reads part 1 of the response.
    pub fn recv_header(&mut self) -> Result<FrameHeader, TransportError> {
        if self.state != RequestState::AwaitingHeader {
            return Err(TransportError::OutOfSequence);
        }
        let header = FrameHeader::from_bytes(&wire::read_message(&mut self.stream)?)?;
        self.state = RequestState::AwaitingFrame(header);
        Ok(header)
    }

    /// Reads part 2 of the response.
    pub fn recv_frame(&mut self) -> Result<CompressedFrame, TransportError> {
        if !matches!(self.state, RequestState::AwaitingFrame(_)) {
            return Err(TransportError::OutOfSequence);
        }
        let frame = CompressedFrame::new(wire::read_message(&mut self.stream)?);
        self.state = RequestState::Idle;
        Ok(frame)
    }

    /// Full request/response cycle.
    pub fn request_frame(&mut self) -> Result<(FrameHeader, CompressedFrame), TransportError> {
        self.send_request(b"request")?;
        let header = self.recv_header()?;
        let frame = self.recv_frame()?;
        Ok((header, frame))
    }
}
