//! Message framing shared by every endpoint.
//!
//! Each message part on a TCP stream is a little-endian `u32` length
//! followed by that many payload bytes.

use super::TransportError;
use bytes::Bytes;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Largest accepted message part.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// Size of the request/response frame header.
pub const HEADER_LEN: usize = 8;

/// Writes one length-prefixed message part.
pub fn write_message<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(TransportError::MessageTooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed message part.
///
/// A clean end of stream before the length prefix is reported as
/// [`TransportError::Closed`].
pub fn read_message<R: Read>(reader: &mut R) -> Result<Bytes, TransportError> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => TransportError::Closed,
        _ => TransportError::Io(e),
    })?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(TransportError::MessageTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Bytes::from(payload))
}

/// Waits up to `timeout` for the stream to have readable data.
///
/// Returns `Ok(false)` on timeout. Nothing is consumed, so a following
/// [`read_message`] never starts mid-message.
pub fn wait_readable(stream: &TcpStream, timeout: Duration) -> Result<bool, TransportError> {
    // A zero timeout is rejected by the socket layer.
    stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
    let mut probe = [0u8; 1];
    let ready = match stream.peek(&mut probe) {
        Ok(0) => Err(TransportError::Closed),
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            Ok(false)
        }
        Err(e) => Err(TransportError::Io(e)),
    };
    stream.set_read_timeout(None)?;
    ready
}

/// Image size header sent ahead of each pulled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Image height in pixels.
    pub rows: i32,
    /// Image width in pixels.
    pub cols: i32,
}

impl FrameHeader {
    pub fn new(rows: i32, cols: i32) -> Self {
        Self { rows, cols }
    }

    /// Header for an image of the given width and height.
    pub fn for_dimensions(width: u32, height: u32) -> Self {
        Self {
            rows: i32::try_from(height).unwrap_or(i32::MAX),
            cols: i32::try_from(width).unwrap_or(i32::MAX),
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..4].copy_from_slice(&self.rows.to_le_bytes());
        buf[4..].copy_from_slice(&self.cols.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, TransportError> {
        let buf: &[u8; HEADER_LEN] = buf
            .try_into()
            .map_err(|_| TransportError::InvalidHeader(buf.len()))?;
        let rows = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let cols = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok(Self { rows, cols })
    }
}
