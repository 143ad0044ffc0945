//! Pixel-format conversion to the codec's input color model.
//!
//! The JPEG encoder consumes packed RGB rows and performs its own
//! RGB → YCbCr 4:2:0 transform internally, so every capture format is
//! normalised to RGB here first. YUYV uses integer BT.601 math; BGRA is
//! a channel swizzle with the alpha dropped.

use crate::error::StreamError;
use crate::types::{PixelFormat, RawFrame};

/// Normalises a raw frame to packed RGB (3 bytes per pixel).
///
/// Validates the buffer geometry first; a mismatched buffer is an
/// encoding error, not a panic.
pub fn to_rgb(frame: &RawFrame) -> Result<Vec<u8>, StreamError> {
    frame.validate()?;
    Ok(match frame.format {
        PixelFormat::Rgb8 => frame.data.clone(),
        PixelFormat::Bgra8 => bgra_to_rgb(&frame.data),
        PixelFormat::Yuyv => yuyv_to_rgb(&frame.data, frame.width, frame.height),
    })
}

/// BGRA → RGB: swizzle channels, drop alpha.
pub fn bgra_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 4 * 3);
    for px in data.chunks_exact(4) {
        rgb.push(px[2]);
        rgb.push(px[1]);
        rgb.push(px[0]);
    }
    rgb
}

/// Packed YUYV (YUV 4:2:2) → RGB, integer BT.601.
///
/// Each 4-byte macropixel `[Y0 U Y1 V]` yields two RGB pixels sharing
/// the chroma pair.
pub fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for mp in data.chunks_exact(4) {
        let u = mp[1] as i32;
        let v = mp[3] as i32;
        push_bt601(&mut rgb, mp[0] as i32, u, v);
        push_bt601(&mut rgb, mp[2] as i32, u, v);
    }
    rgb
}

// Studio-swing BT.601: Y in [16,235], chroma centered on 128.
fn push_bt601(out: &mut Vec<u8>, y: i32, u: i32, v: i32) {
    let c = y - 16;
    let d = u - 128;
    let e = v - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    out.push(r.clamp(0, 255) as u8);
    out.push(g.clamp(0, 255) as u8);
    out.push(b.clamp(0, 255) as u8);
}
