//! Frame type representing a captured image with metadata.

use std::time::Instant;

/// Pixel layout of a raw frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// One byte per pixel.
    Gray8,
    /// Three bytes per pixel, packed R, G, B.
    #[default]
    Rgb8,
}

impl PixelFormat {
    /// Bytes used by a single pixel.
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// A single captured frame from a camera device.
///
/// Holds tightly packed pixel rows (no stride padding) together with
/// the metadata the capture loop logs alongside it.
#[derive(Clone)]
pub struct Frame {
    /// Raw pixel data, row-major.
    pixels: Vec<u8>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Pixel layout of `pixels`.
    format: PixelFormat,
    /// Capture timestamp.
    timestamp: Instant,
    /// Monotonic sequence number assigned by the device.
    sequence: u64,
}

impl Frame {
    /// Creates a new RGB frame.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self::with_format(pixels, width, height, PixelFormat::Rgb8, sequence)
    }

    /// Creates a new frame with an explicit pixel layout.
    pub fn with_format(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self {
            pixels,
            width,
            height,
            format,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Creates a frame where every pixel has the same RGB value.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], sequence: u64) -> Self {
        let pixel_count = (width as usize) * (height as usize);
        let pixels = rgb.iter().copied().cycle().take(pixel_count * 3).collect();
        Self::new(pixels, width, height, sequence)
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Validates that the pixel buffer size matches dimensions and format.
    pub fn is_valid(&self) -> bool {
        self.pixel_count() > 0
            && self.pixels.len() == self.pixel_count() * self.format.bytes_per_pixel()
    }

    /// Consumes the frame, returning its pixel buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let pixels = vec![0u8; 640 * 480 * 3];
        let frame = Frame::new(pixels, 640, 480, 1);

        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.format(), PixelFormat::Rgb8);
        assert_eq!(frame.sequence(), 1);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_frame_invalid_size() {
        let pixels = vec![0u8; 100]; // Wrong size
        let frame = Frame::new(pixels, 640, 480, 1);

        assert!(!frame.is_valid());
    }

    #[test]
    fn test_gray_frame_size() {
        let frame = Frame::with_format(vec![7u8; 16], 4, 4, PixelFormat::Gray8, 0);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_zero_sized_frame_invalid() {
        let frame = Frame::new(Vec::new(), 0, 480, 1);
        assert!(!frame.is_valid());
    }

    #[test]
    fn test_solid_frame() {
        let frame = Frame::solid(4, 2, [10, 20, 30], 3);
        assert!(frame.is_valid());
        assert_eq!(&frame.pixels()[..6], &[10, 20, 30, 10, 20, 30]);
    }
}
