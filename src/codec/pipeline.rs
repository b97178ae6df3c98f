//! Two-stage frame compression: JPEG, then zlib.

use super::{CodecError, CompressedFrame};
use crate::capture::{CameraConfig, Frame, PixelFormat, MAX_JPEG_QUALITY, MAX_ZLIB_LEVEL};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageBuffer, ImageFormat, Luma, Rgb};
use std::io::{Read, Write};

/// Largest edge a baseline JPEG can describe.
pub const MAX_JPEG_DIMENSION: u32 = u16::MAX as u32;

/// Stage 1: encodes a raw frame as JPEG.
///
/// Quality is clamped to 1..=100; 0 encodes like 1.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, CodecError> {
    check_encodable(frame)?;

    let color = match frame.format() {
        PixelFormat::Gray8 => ExtendedColorType::L8,
        PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
    };
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, MAX_JPEG_QUALITY))
        .encode(frame.pixels(), frame.width(), frame.height(), color)
        .map_err(|e| CodecError::EncodeFailed(e.to_string()))?;
    Ok(jpeg)
}

fn check_encodable(frame: &Frame) -> Result<(), CodecError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(CodecError::EncodeFailed(format!(
            "degenerate frame {}x{}",
            frame.width(),
            frame.height()
        )));
    }
    if frame.width() > MAX_JPEG_DIMENSION || frame.height() > MAX_JPEG_DIMENSION {
        return Err(CodecError::EncodeFailed(format!(
            "frame {}x{} exceeds jpeg limits",
            frame.width(),
            frame.height()
        )));
    }
    if !frame.is_valid() {
        return Err(CodecError::EncodeFailed(format!(
            "pixel buffer of {} bytes does not match {}x{} {:?}",
            frame.pixels().len(),
            frame.width(),
            frame.height(),
            frame.format()
        )));
    }
    Ok(())
}

/// Stage 2: zlib-compresses a byte buffer. Level is clamped to 0..=9.
pub fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len()),
        Compression::new(level.min(MAX_ZLIB_LEVEL)),
    );
    encoder.write_all(data).map_err(CodecError::Compression)?;
    encoder.finish().map_err(CodecError::Compression)
}

/// Runs both stages over one frame.
pub fn compress(frame: &Frame, quality: u8, level: u32) -> Result<CompressedFrame, CodecError> {
    let jpeg = encode_jpeg(frame, quality)?;
    let compressed = deflate(&jpeg, level)?;
    Ok(CompressedFrame::new(compressed))
}

/// Reverses stage 2.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoded = Vec::with_capacity(data.len() * 2);
    ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(CodecError::DecompressFailed)?;
    Ok(decoded)
}

/// Reverses stage 1, producing an RGB frame.
pub fn decode(jpeg: &[u8]) -> Result<Frame, CodecError> {
    let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .map_err(|e| CodecError::DecodeFailed(e.to_string()))?
        .to_rgb8();
    let (width, height) = image.dimensions();
    Ok(Frame::new(image.into_raw(), width, height, 0))
}

/// Decompresses and decodes a frame received from the wire.
pub fn decode_compressed(data: &[u8]) -> Result<Frame, CodecError> {
    decode(&decompress(data)?)
}

/// Scales a frame to the given size.
pub fn resize(frame: &Frame, width: u32, height: u32) -> Result<Frame, CodecError> {
    check_encodable(frame)?;
    if width == 0 || height == 0 {
        return Err(CodecError::EncodeFailed(format!(
            "cannot resize to {width}x{height}"
        )));
    }

    let mismatch = || CodecError::EncodeFailed("pixel buffer does not match frame".to_string());
    let pixels = match frame.format() {
        PixelFormat::Rgb8 => {
            let source: ImageBuffer<Rgb<u8>, &[u8]> =
                ImageBuffer::from_raw(frame.width(), frame.height(), frame.pixels())
                    .ok_or_else(mismatch)?;
            imageops::resize(&source, width, height, FilterType::Triangle).into_raw()
        }
        PixelFormat::Gray8 => {
            let source: ImageBuffer<Luma<u8>, &[u8]> =
                ImageBuffer::from_raw(frame.width(), frame.height(), frame.pixels())
                    .ok_or_else(mismatch)?;
            imageops::resize(&source, width, height, FilterType::Triangle).into_raw()
        }
    };
    Ok(Frame::with_format(
        pixels,
        width,
        height,
        frame.format(),
        frame.sequence(),
    ))
}

/// Compression settings applied by a capture loop to every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecPipeline {
    quality: u8,
    level: u32,
    /// Frames of any other size are scaled to this before encoding.
    target: Option<(u32, u32)>,
}

impl CodecPipeline {
    pub fn new(quality: u8, level: u32) -> Self {
        Self {
            quality,
            level,
            target: None,
        }
    }

    /// Pipeline that also normalizes frames to the configured resolution.
    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(config.jpeg_quality, config.zlib_level).with_target(config.width, config.height)
    }

    pub fn with_target(mut self, width: u32, height: u32) -> Self {
        self.target = Some((width, height));
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn target(&self) -> Option<(u32, u32)> {
        self.target
    }

    /// Output size for a frame of the given size.
    pub fn output_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        self.target.unwrap_or((width, height))
    }

    fn normalize<'a>(&self, frame: &'a Frame) -> Result<std::borrow::Cow<'a, Frame>, CodecError> {
        match self.target {
            Some((width, height)) if (frame.width(), frame.height()) != (width, height) => {
                Ok(std::borrow::Cow::Owned(resize(frame, width, height)?))
            }
            _ => Ok(std::borrow::Cow::Borrowed(frame)),
        }
    }

    /// JPEG only, for sinks that consume plain JPEG (MJPEG over HTTP).
    pub fn encode_jpeg(&self, frame: &Frame) -> Result<Vec<u8>, CodecError> {
        let frame = self.normalize(frame)?;
        encode_jpeg(&frame, self.quality)
    }

    /// Full JPEG + zlib compression.
    pub fn compress(&self, frame: &Frame) -> Result<CompressedFrame, CodecError> {
        let frame = self.normalize(frame)?;
        compress(&frame, self.quality, self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x * 4) as u8, (y * 4) as u8, 128]);
            }
        }
        Frame::new(pixels, width, height, 1)
    }

    #[test]
    fn test_round_trip_dimensions() {
        let frame = Frame::solid(640, 480, [200, 10, 10], 1);
        let compressed = compress(&frame, 90, 1).unwrap();
        let decoded = decode_compressed(compressed.as_bytes()).unwrap();

        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[test]
    fn test_stage_one_is_jpeg() {
        let frame = gradient(16, 16);
        let compressed = compress(&frame, 75, 6).unwrap();
        let jpeg = decompress(compressed.as_bytes()).unwrap();

        // SOI marker.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(jpeg, encode_jpeg(&frame, 75).unwrap());
    }

    #[test]
    fn test_compress_is_deterministic() {
        let frame = gradient(48, 32);
        let a = compress(&frame, 85, 1).unwrap();
        let b = compress(&frame, 85, 1).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_solid_colour_survives() {
        let frame = Frame::solid(32, 32, [40, 120, 200], 1);
        let decoded = decode_compressed(compress(&frame, 95, 9).unwrap().as_bytes()).unwrap();

        let centre = ((16 * 32 + 16) * 3) as usize;
        let pixel = &decoded.pixels()[centre..centre + 3];
        for (got, want) in pixel.iter().zip([40u8, 120, 200]) {
            assert!((i16::from(*got) - i16::from(want)).abs() <= 8, "{pixel:?}");
        }
    }

    #[test]
    fn test_grayscale_frame() {
        let frame = Frame::with_format(vec![90u8; 20 * 10], 20, 10, PixelFormat::Gray8, 1);
        let decoded = decode_compressed(compress(&frame, 50, 1).unwrap().as_bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
    }

    #[test]
    fn test_quality_zero_is_clamped() {
        let frame = gradient(16, 16);
        assert_eq!(
            encode_jpeg(&frame, 0).unwrap(),
            encode_jpeg(&frame, 1).unwrap()
        );
    }

    #[test]
    fn test_level_above_nine_is_clamped() {
        let data = vec![7u8; 4096];
        assert_eq!(deflate(&data, 42).unwrap(), deflate(&data, 9).unwrap());
    }

    #[test]
    fn test_degenerate_frames_fail() {
        let empty = Frame::new(Vec::new(), 0, 0, 1);
        assert!(matches!(
            compress(&empty, 90, 1),
            Err(CodecError::EncodeFailed(_))
        ));

        let short = Frame::new(vec![0u8; 10], 8, 8, 1);
        assert!(matches!(
            compress(&short, 90, 1),
            Err(CodecError::EncodeFailed(_))
        ));

        let huge = Frame::new(Vec::new(), 70_000, 1, 1);
        assert!(matches!(
            compress(&huge, 90, 1),
            Err(CodecError::EncodeFailed(_))
        ));
    }

    #[test]
    fn test_garbage_input_fails_to_decode() {
        assert!(matches!(
            decompress(b"not zlib"),
            Err(CodecError::DecompressFailed(_))
        ));
        assert!(matches!(
            decode(b"not a jpeg"),
            Err(CodecError::DecodeFailed(_))
        ));
    }

    #[test]
    fn test_pipeline_resizes_to_target() {
        let pipeline = CodecPipeline::new(80, 1).with_target(64, 48);
        let frame = gradient(32, 24);

        let decoded = decode_compressed(pipeline.compress(&frame).unwrap().as_bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));

        let jpeg = pipeline.encode_jpeg(&frame).unwrap();
        let decoded = decode(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_pipeline_without_resize_matches_free_functions() {
        let pipeline = CodecPipeline::new(85, 1).with_target(32, 24);
        let frame = gradient(32, 24);

        let compressed = pipeline.compress(&frame).unwrap();
        assert_eq!(compressed.as_bytes(), compress(&frame, 85, 1).unwrap().as_bytes());
        assert_eq!(pipeline.encode_jpeg(&frame).unwrap(), encode_jpeg(&frame, 85).unwrap());
    }

    #[test]
    fn test_pipeline_from_config() {
        let config = CameraConfig {
            width: 320,
            height: 240,
            jpeg_quality: 70,
            zlib_level: 3,
            ..Default::default()
        };
        let pipeline = CodecPipeline::from_config(&config);
        assert_eq!(pipeline.quality(), 70);
        assert_eq!(pipeline.level(), 3);
        assert_eq!(pipeline.output_dimensions(10, 10), (320, 240));
        assert_eq!(CodecPipeline::new(70, 3).output_dimensions(10, 10), (10, 10));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_round_trip_preserves_dimensions(
            width in 1u32..48,
            height in 1u32..48,
            quality in 0u8..=100,
            level in 0u32..=9,
            seed in any::<u8>(),
        ) {
            let pixels: Vec<u8> = (0..width * height * 3)
                .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
                .collect();
            let frame = Frame::new(pixels, width, height, 1);

            let first = compress(&frame, quality, level).unwrap();
            let second = compress(&frame, quality, level).unwrap();
            prop_assert_eq!(first.as_bytes(), second.as_bytes());

            let decoded = decode_compressed(first.as_bytes()).unwrap();
            prop_assert_eq!((decoded.width(), decoded.height()), (width, height));
        }
    }
}
