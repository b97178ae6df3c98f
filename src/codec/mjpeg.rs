//! Multipart framing for MJPEG-over-HTTP sinks.
//!
//! The HTTP server itself lives outside this crate. These helpers produce
//! the exact part bytes such a server writes for each JPEG frame.

use bytes::{BufMut, Bytes, BytesMut};

/// Boundary marker separating parts.
pub const BOUNDARY: &str = "frame";

/// Response content type announcing the boundary.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// Wraps one JPEG image as a multipart part.
pub fn part(jpeg: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
    buf.put_slice(PART_HEADER);
    buf.put_slice(jpeg);
    buf.put_slice(PART_TRAILER);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_layout() {
        let part = part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8\xFF\xD9\r\n"
        );
    }

    #[test]
    fn test_resized_jpeg_part() {
        use crate::capture::Frame;
        use crate::codec::{decode, CodecPipeline};

        let pipeline = CodecPipeline::new(80, 1).with_target(640, 480);
        let jpeg = pipeline
            .encode_jpeg(&Frame::solid(1280, 720, [10, 200, 10], 1))
            .unwrap();
        let part = part(&jpeg);

        let body = &part[PART_HEADER.len()..part.len() - PART_TRAILER.len()];
        let decoded = decode(body).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[test]
    fn test_boundary_matches_content_type() {
        assert!(CONTENT_TYPE.ends_with(&format!("boundary={BOUNDARY}")));
        assert!(PART_HEADER.starts_with(format!("--{BOUNDARY}\r\n").as_bytes()));
    }
}
