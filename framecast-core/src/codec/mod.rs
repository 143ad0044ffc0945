//! JPEG frame codec: raw frames → compressed payloads and back.
//!
//! Encoding normalises the capture pixel format to RGB ([`convert`]),
//! then compresses with a tunable quality factor (default 75). The
//! compressed stream carries YCbCr with 4:2:0 chroma subsampling at
//! streaming quality levels, so chroma cost stays bounded regardless of
//! the capture format. Decoding is the inverse and always yields packed
//! RGB.
//!
//! Size policy: an encode whose output would exceed the configured
//! transport maximum fails with [`StreamError::PayloadTooLarge`] before
//! anything is handed to a transport. Truncation never happens. Scaling
//! a too-large *resolution* down is a caller decision, via
//! [`downscale_to_width`], not something the codec does on its own.

pub mod convert;

use crate::error::StreamError;
use crate::types::{PixelFormat, RawFrame};

/// Default JPEG quality factor used throughout the pipeline.
pub const DEFAULT_QUALITY: u8 = 75;

// ── FrameCodec ───────────────────────────────────────────────────

/// Stateless JPEG encoder/decoder with a payload size bound.
///
/// Cheap to clone and share; all state is configuration.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// JPEG quality factor, 1..=100.
    quality: u8,
    /// Hard bound on encoded payload size in bytes.
    max_payload: usize,
}

impl FrameCodec {
    /// Creates a codec bounded by `max_payload` bytes at the default
    /// quality.
    pub fn new(max_payload: usize) -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            max_payload,
        }
    }

    /// Sets the quality factor, clamped to 1..=100.
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Current quality factor.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Payload size bound in bytes.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Compresses a raw frame into a JPEG payload.
    ///
    /// Fails with [`StreamError::PayloadTooLarge`] if the result would
    /// not fit the transport bound; the caller decides whether to
    /// downscale and retry or drop the frame.
    pub fn encode(&self, frame: &RawFrame) -> Result<Vec<u8>, StreamError> {
        let rgb = convert::to_rgb(frame)?;
        let img: image::RgbImage =
            image::ImageBuffer::from_raw(frame.width, frame.height, rgb).ok_or_else(|| {
                StreamError::Encoding("pixel buffer does not match frame geometry".into())
            })?;

        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        encoder.encode_image(&img)?;

        if jpeg.len() > self.max_payload {
            return Err(StreamError::PayloadTooLarge {
                size: jpeg.len(),
                max: self.max_payload,
            });
        }
        Ok(jpeg)
    }

    /// Decompresses a JPEG payload back into a packed RGB frame.
    ///
    /// Malformed input fails with [`StreamError::CorruptPayload`]; the
    /// decode loop drops that frame and continues, it never restarts.
    pub fn decode(&self, payload: &[u8]) -> Result<RawFrame, StreamError> {
        let mut decoder = zune_jpeg::JpegDecoder::new(payload);
        let pixels = decoder
            .decode()
            .map_err(|e| StreamError::CorruptPayload(e.to_string()))?;
        let (width, height) = decoder
            .dimensions()
            .ok_or_else(|| StreamError::CorruptPayload("missing image dimensions".into()))?;

        let px = width * height;
        let data = match pixels.len() {
            n if n == px * 3 => pixels,
            // Grayscale source: replicate luma into all three channels.
            n if n == px => {
                let mut rgb = Vec::with_capacity(px * 3);
                for y in pixels {
                    rgb.extend_from_slice(&[y, y, y]);
                }
                rgb
            }
            n => {
                return Err(StreamError::CorruptPayload(format!(
                    "unexpected plane size {n} for {width}x{height}"
                )));
            }
        };

        Ok(RawFrame::new(
            width as u32,
            height as u32,
            PixelFormat::Rgb8,
            data,
        ))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(crate::packet::MAX_PAYLOAD_BYTES)
    }
}

// ── Resize policy ────────────────────────────────────────────────

/// Scales a frame down so its width does not exceed `max_width`,
/// preserving aspect ratio with a Catmull-Rom filter.
///
/// Frames already within the cap (and any cap of 0, meaning uncapped)
/// come back unchanged. The capture timestamp is preserved.
pub fn downscale_to_width(frame: &RawFrame, max_width: u32) -> Result<RawFrame, StreamError> {
    if max_width == 0 || frame.width <= max_width {
        return Ok(frame.clone());
    }

    let rgb = convert::to_rgb(frame)?;
    let img: image::RgbImage =
        image::ImageBuffer::from_raw(frame.width, frame.height, rgb).ok_or_else(|| {
            StreamError::Encoding("pixel buffer does not match frame geometry".into())
        })?;

    let new_h = ((frame.height as u64 * max_width as u64) / frame.width as u64).max(1) as u32;
    let resized = image::imageops::resize(
        &img,
        max_width,
        new_h,
        image::imageops::FilterType::CatmullRom,
    );

    Ok(RawFrame {
        width: max_width,
        height: new_h,
        format: PixelFormat::Rgb8,
        data: resized.into_raw(),
        timestamp_ns: frame.timestamp_ns,
    })
}

// ── Tests ────────────────────────────────────────────────────────
