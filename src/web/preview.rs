// SPDX-License-Identifier: GPL-3.0-only

//! Preview frame encoders
//!
//! Converts hub frames into the JPEG parts of the MJPEG streams. Depth
//! frames are mapped through a cyclic 6-segment hue palette so successive
//! depth bands stay distinguishable; video frames pass through. Both are
//! downscaled to a bandwidth-friendly preview size.

use crate::constants::{DEPTH_COEFF_A, DEPTH_COEFF_B};
use crate::frame::{RawFrame, VideoFrame};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage, imageops};
use std::sync::OnceLock;

const PREVIEW_WIDTH: u32 = 480;
const PREVIEW_HEIGHT: u32 = 360;
const JPEG_QUALITY: u8 = 75;

/// Raw samples are clipped here before palette mapping; beyond it the
/// display polynomial leaves the 0..255 range
const DEPTH_DISPLAY_CLIP: f64 = 1046.31;

/// 256-entry cyclic hue palette; the last entry renders clipped samples
/// black.
fn hue_palette() -> &'static [[u8; 3]; 256] {
    static PALETTE: OnceLock<[[u8; 3]; 256]> = OnceLock::new();
    PALETTE.get_or_init(|| {
        let mut palette = [[0u8; 3]; 256];
        for (i, entry) in palette.iter_mut().enumerate().take(255) {
            let v = i * 6;
            let segment = (v >> 8) % 6;
            let level = (v & 0xff) as u8;
            *entry = match segment {
                0 => [255, 0, 255 - level],
                1 => [255, level, 0],
                2 => [255 - level, 255, 0],
                3 => [0, 255, level],
                4 => [0, 255 - level, 255],
                _ => [level, 0, 255],
            };
        }
        palette[255] = [0, 0, 0];
        palette
    })
}

fn encode_jpeg(img: &RgbImage) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder.encode_image(img).ok()?;
    Some(out)
}

/// Colorize a raw depth frame and encode it as a preview JPEG.
pub fn depth_to_jpeg(raw: &RawFrame) -> Option<Vec<u8>> {
    let (h, w) = raw.dim();
    let palette = hue_palette();
    let mut img = RgbImage::new(w as u32, h as u32);
    for ((y, x), &sample) in raw.indexed_iter() {
        let clipped = f64::from(sample).min(DEPTH_DISPLAY_CLIP);
        let value = 45.0 / (clipped * DEPTH_COEFF_A + DEPTH_COEFF_B) - 45.0;
        let index = value.clamp(0.0, 255.0) as usize;
        img.put_pixel(x as u32, y as u32, Rgb(palette[index]));
    }
    let img = imageops::resize(
        &img,
        PREVIEW_WIDTH,
        PREVIEW_HEIGHT,
        imageops::FilterType::Triangle,
    );
    encode_jpeg(&img)
}

/// Encode a video frame as a preview JPEG.
pub fn video_to_jpeg(frame: &VideoFrame) -> Option<Vec<u8>> {
    let (h, w, channels) = frame.dim();
    if channels != 3 {
        return None;
    }
    let buf: Vec<u8> = frame.iter().copied().collect();
    let img = RgbImage::from_raw(w as u32, h as u32, buf)?;
    let img = imageops::resize(
        &img,
        PREVIEW_WIDTH,
        PREVIEW_HEIGHT,
        imageops::FilterType::Triangle,
    );
    encode_jpeg(&img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn palette_cycles_through_six_segments() {
        let palette = hue_palette();
        // Segment boundaries per the v >> 8 arithmetic
        assert_eq!(palette[0], [255, 0, 255]);
        assert_eq!(palette[43], [255, 2, 0]);
        assert_eq!(palette[255], [0, 0, 0]);
        // Every entry but the terminator carries at least one full channel
        for entry in palette.iter().take(255) {
            assert!(entry.contains(&255));
        }
    }

    #[test]
    fn depth_frames_encode_as_jpeg() {
        let raw = Array2::from_shape_fn((48, 64), |(y, x)| (400 + y * 4 + x) as u16);
        let jpeg = depth_to_jpeg(&raw).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8], "missing JPEG magic");
    }

    #[test]
    fn video_frames_encode_as_jpeg() {
        let frame = Array3::from_shape_fn((48, 64, 3), |(y, x, c)| (y + x + c) as u8);
        let jpeg = video_to_jpeg(&frame).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }
}
