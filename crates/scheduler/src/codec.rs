//! JPEG framing for cached frames.
//!
//! Frames come off the GPU as tightly packed RGBA rows. The encoder reads them
//! through [`RgbView`], a borrowed view that drops the alpha byte per pixel, so
//! no second full-size buffer is ever allocated. Decoding writes the RGB
//! scanlines straight into the final RGBA allocation and widens them in place.
//!
//! The JPEG library is treated as untrusted at the call boundary: any panic it
//! raises is caught with [`std::panic::catch_unwind`] and surfaced as an
//! ordinary error value.

use std::any::Any;
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};

use image::codecs::jpeg::{JpegDecoder, JpegEncoder};
use image::{ColorType, GenericImageView, ImageDecoder, ImageError, Rgb};

use crate::cache::CompressedFrame;

/// Bytes per pixel of the raw frames exchanged with the renderer.
pub const RGBA_BYTES_PER_PIXEL: usize = 4;

/// JPEG quality in the inclusive range 1..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

#[derive(Debug, thiserror::Error)]
#[error("cache quality must be between 1 and 100 (got {0})")]
pub struct QualityError(pub u32);

impl Quality {
    pub const DEFAULT: Quality = Quality(75);

    pub fn new(value: u32) -> Result<Self, QualityError> {
        match u8::try_from(value) {
            Ok(quality @ 1..=100) => Ok(Self(quality)),
            _ => Err(QualityError(value)),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("frame has zero area ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("pixel buffer holds {actual} bytes but {width}x{height} RGBA needs {expected}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("jpeg encoder failed: {0}")]
    Encoder(#[source] ImageError),
    #[error("jpeg encoder aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to read jpeg header: {0}")]
    Header(#[source] ImageError),
    #[error(
        "cached frame is {actual_width}x{actual_height} but the session expects {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("unsupported jpeg color layout {0:?}")]
    UnsupportedColor(ColorType),
    #[error("failed to read jpeg scanlines: {0}")]
    Read(#[source] ImageError),
    #[error("jpeg decoder aborted: {0}")]
    Aborted(String),
}

/// Encode/decode seam used by the scheduler.
///
/// Implementations must be deterministic in their output dimensions: a frame
/// encoded at `width`x`height` decodes to exactly `width * height * 4` bytes.
pub trait FrameCodec {
    fn encode(&self, rgba: &[u8], width: u32, height: u32) -> Result<CompressedFrame, EncodeError>;

    fn decode(
        &self,
        frame: &CompressedFrame,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, DecodeError>;
}

/// Baseline JPEG codec with a fixed quality for the whole session.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec {
    quality: Quality,
}

impl JpegCodec {
    pub fn new(quality: Quality) -> Self {
        Self { quality }
    }
}

impl FrameCodec for JpegCodec {
    fn encode(&self, rgba: &[u8], width: u32, height: u32) -> Result<CompressedFrame, EncodeError> {
        encode(rgba, width, height, self.quality)
    }

    fn decode(
        &self,
        frame: &CompressedFrame,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, DecodeError> {
        decode(frame, width, height)
    }
}

/// Compresses one RGBA frame, discarding alpha.
pub fn encode(
    rgba: &[u8],
    width: u32,
    height: u32,
    quality: Quality,
) -> Result<CompressedFrame, EncodeError> {
    if width == 0 || height == 0 {
        return Err(EncodeError::EmptyFrame { width, height });
    }
    let expected = width as usize * height as usize * RGBA_BYTES_PER_PIXEL;
    if rgba.len() != expected {
        return Err(EncodeError::BufferSize {
            width,
            height,
            expected,
            actual: rgba.len(),
        });
    }

    let view = RgbView {
        rgba,
        width,
        height,
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut data = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut data, quality.get());
        encoder.encode_image(&view)?;
        drop(encoder);
        Ok::<_, ImageError>(data)
    }));

    match outcome {
        Ok(Ok(data)) => Ok(CompressedFrame::new(data)),
        Ok(Err(err)) => Err(EncodeError::Encoder(err)),
        Err(payload) => Err(EncodeError::Aborted(panic_message(payload))),
    }
}

/// Decompresses a frame into RGBA with alpha forced to 255.
pub fn decode(frame: &CompressedFrame, width: u32, height: u32) -> Result<Vec<u8>, DecodeError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| decode_inner(frame, width, height)));
    match outcome {
        Ok(result) => result,
        Err(payload) => Err(DecodeError::Aborted(panic_message(payload))),
    }
}

fn decode_inner(frame: &CompressedFrame, width: u32, height: u32) -> Result<Vec<u8>, DecodeError> {
    let decoder = JpegDecoder::new(Cursor::new(frame.as_bytes())).map_err(DecodeError::Header)?;
    let (actual_width, actual_height) = decoder.dimensions();
    if (actual_width, actual_height) != (width, height) {
        return Err(DecodeError::DimensionMismatch {
            expected_width: width,
            expected_height: height,
            actual_width,
            actual_height,
        });
    }

    let channels = match decoder.color_type() {
        ColorType::Rgb8 => 3,
        ColorType::L8 => 1,
        other => return Err(DecodeError::UnsupportedColor(other)),
    };

    let pixels = width as usize * height as usize;
    let mut rgba = vec![0u8; pixels * RGBA_BYTES_PER_PIXEL];
    decoder
        .read_image(&mut rgba[..pixels * channels])
        .map_err(DecodeError::Read)?;
    widen_in_place(&mut rgba, pixels, channels);
    Ok(rgba)
}

/// Spreads `channels`-wide pixels packed at the front of `buffer` out to RGBA.
///
/// Walks back to front so every source pixel is read before its bytes are
/// overwritten.
fn widen_in_place(buffer: &mut [u8], pixels: usize, channels: usize) {
    for index in (0..pixels).rev() {
        let src = index * channels;
        let dst = index * RGBA_BYTES_PER_PIXEL;
        let (r, g, b) = if channels == 1 {
            let luma = buffer[src];
            (luma, luma, luma)
        } else {
            (buffer[src], buffer[src + 1], buffer[src + 2])
        };
        buffer[dst] = r;
        buffer[dst + 1] = g;
        buffer[dst + 2] = b;
        buffer[dst + 3] = u8::MAX;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Borrowed RGBA rows presented to the encoder as RGB pixels.
struct RgbView<'a> {
    rgba: &'a [u8],
    width: u32,
    height: u32,
}

impl GenericImageView for RgbView<'_> {
    type Pixel = Rgb<u8>;

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn get_pixel(&self, x: u32, y: u32) -> Rgb<u8> {
        let offset = (y as usize * self.width as usize + x as usize) * RGBA_BYTES_PER_PIXEL;
        Rgb([
            self.rgba[offset],
            self.rgba[offset + 1],
            self.rgba[offset + 2],
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                rgba.extend_from_slice(&[(x * 7) as u8, (y * 5) as u8, 128, 17]);
            }
        }
        rgba
    }

    #[test]
    fn quality_bounds() {
        assert!(Quality::new(0).is_err());
        assert!(Quality::new(101).is_err());
        assert_eq!(Quality::new(1).unwrap().get(), 1);
        assert_eq!(Quality::new(100).unwrap().get(), 100);
        assert_eq!(Quality::default().get(), 75);
    }

    #[test]
    fn decoded_frame_keeps_dimensions_across_qualities() {
        let (width, height) = (13, 9);
        let rgba = gradient(width, height);
        for q in [1, 2, 25, 50, 75, 99, 100] {
            let frame = encode(&rgba, width, height, Quality::new(q).unwrap()).unwrap();
            assert!(!frame.is_empty());
            let decoded = decode(&frame, width, height).unwrap();
            assert_eq!(decoded.len(), rgba.len(), "quality {q}");
        }
    }

    #[test]
    fn decode_forces_opaque_alpha() {
        let rgba = gradient(8, 8);
        let frame = encode(&rgba, 8, 8, Quality::new(90).unwrap()).unwrap();
        let decoded = decode(&frame, 8, 8).unwrap();
        assert!(decoded.chunks_exact(4).all(|pixel| pixel[3] == 255));
    }

    #[test]
    fn decode_rejects_other_geometry() {
        let rgba = gradient(6, 4);
        let frame = encode(&rgba, 6, 4, Quality::DEFAULT).unwrap();
        for (width, height) in [(4, 6), (6, 5), (5, 4), (1, 1)] {
            let err = decode(&frame, width, height).unwrap_err();
            assert!(
                matches!(err, DecodeError::DimensionMismatch { actual_width: 6, actual_height: 4, .. }),
                "{width}x{height}: {err}"
            );
        }
    }

    #[test]
    fn encode_rejects_short_buffer() {
        let err = encode(&[0; 12], 2, 2, Quality::DEFAULT).unwrap_err();
        assert!(matches!(err, EncodeError::BufferSize { expected: 16, actual: 12, .. }));
        let err = encode(&[], 0, 2, Quality::DEFAULT).unwrap_err();
        assert!(matches!(err, EncodeError::EmptyFrame { .. }));
    }

    #[test]
    fn garbage_is_a_header_error() {
        let frame = CompressedFrame::new(vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(
            decode(&frame, 2, 2),
            Err(DecodeError::Header(_)) | Err(DecodeError::Aborted(_))
        ));
    }

    #[test]
    fn solid_colour_survives_high_quality() {
        let mut rgba = Vec::new();
        for _ in 0..16 {
            rgba.extend_from_slice(&[10, 200, 40, 255]);
        }
        let frame = encode(&rgba, 4, 4, Quality::new(100).unwrap()).unwrap();
        let decoded = decode(&frame, 4, 4).unwrap();
        for pixel in decoded.chunks_exact(4) {
            assert!(pixel[0].abs_diff(10) <= 4);
            assert!(pixel[1].abs_diff(200) <= 4);
            assert!(pixel[2].abs_diff(40) <= 4);
        }
    }
}
