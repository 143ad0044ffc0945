//! Shared frame types for the capture/encode/display pipeline.
//!
//! These are **internal** representations passed between pipeline stages.
//! They are distinct from [`crate::packet::VideoPacket`], which is the
//! serialisable *wire* type handed to transports.

use std::sync::OnceLock;
use std::time::Instant;

use crate::error::StreamError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (desktop capture default).
    Bgra8,
    /// Packed YUV 4:2:2, 4 bytes per 2-pixel macropixel (webcam default).
    Yuyv,
}

impl PixelFormat {
    /// Average bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Bgra8 => 4,
            PixelFormat::Yuyv => 2,
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// A raw, uncompressed frame obtained from a capture source.
///
/// The `data` buffer holds `height` packed rows of
/// `width * bytes_per_pixel` bytes each. Ownership is exclusive: a frame
/// moves between pipeline stages through a slot, it is never shared.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Packed pixel data, `width * height * bpp` bytes.
    pub data: Vec<u8>,
    /// Monotonic capture timestamp, nanoseconds since process start.
    pub timestamp_ns: u64,
}

impl RawFrame {
    /// Builds a frame stamped with the current monotonic time.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
            timestamp_ns: monotonic_ns(),
        }
    }

    /// Byte size the packed bitmap must occupy for its geometry.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Checks that the buffer matches the declared geometry.
    ///
    /// YUYV additionally requires an even width, since two horizontal
    /// pixels share one chroma sample.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.format == PixelFormat::Yuyv && self.width % 2 != 0 {
            return Err(StreamError::Encoding(format!(
                "YUYV frame width must be even, got {}",
                self.width
            )));
        }
        let expected = self.expected_len();
        if self.data.len() != expected {
            return Err(StreamError::InvalidFrameBuffer {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

// ── Monotonic clock ──────────────────────────────────────────────

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed on the monotonic clock since the first call in
/// this process. Wire timestamps and frame stamps all come from here, so
/// they are mutually comparable within one process lifetime.
pub fn monotonic_ns() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_pixel() {
        assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Yuyv.bytes_per_pixel(), 2);
    }

    #[test]
    fn validate_accepts_matching_buffer() {
        let f = RawFrame::new(4, 2, PixelFormat::Rgb8, vec![0; 4 * 2 * 3]);
        assert!(f.validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_buffer() {
        let f = RawFrame::new(4, 2, PixelFormat::Rgb8, vec![0; 10]);
        assert!(matches!(
            f.validate(),
            Err(StreamError::InvalidFrameBuffer {
                expected: 24,
                actual: 10
            })
        ));
    }

    #[test]
    fn validate_rejects_odd_yuyv_width() {
        let f = RawFrame::new(3, 2, PixelFormat::Yuyv, vec![0; 12]);
        assert!(f.validate().is_err());
    }

    #[test]
    fn monotonic_ns_is_nondecreasing() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(b >= a);
    }
}
