//! Frame compression.
//!
//! Every captured frame goes through two stages before it reaches the
//! network:
//!
//! ```text
//! raw pixels → JPEG (quality 0-100) → zlib (level 0-9) → CompressedFrame
//! ```
//!
//! Both stages are deterministic, so identical frames and settings yield
//! byte-identical output. Receivers reverse the pipeline with
//! [`decode_compressed`].

pub mod mjpeg;
mod pipeline;

pub use pipeline::{
    compress, decode, decode_compressed, decompress, deflate, encode_jpeg, resize, CodecPipeline,
    MAX_JPEG_DIMENSION,
};

use bytes::Bytes;
use thiserror::Error;

/// Errors produced while compressing or restoring frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame could not be JPEG encoded. Callers skip the frame.
    #[error("encode failed: {0}")]
    EncodeFailed(String),
    #[error("compression failed: {0}")]
    Compression(std::io::Error),
    #[error("decompression failed: {0}")]
    DecompressFailed(std::io::Error),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
}

/// Output of the codec pipeline for one frame.
///
/// Cloning is cheap: clones share the underlying buffer, which is how one
/// frame fans out to many subscribers.
#[derive(Clone, PartialEq, Eq)]
pub struct CompressedFrame {
    data: Bytes,
}

impl CompressedFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shared handle to the payload.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl std::fmt::Debug for CompressedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedFrame")
            .field("bytes", &self.data.len())
            .finish()
    }
}
