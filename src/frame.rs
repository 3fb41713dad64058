// SPDX-License-Identifier: GPL-3.0-only

//! Frame math
//!
//! Stateless conversions between the sensor's raw 11-bit range samples and
//! the meter-domain frames the detector works in, plus the grayscale display
//! transforms used by debug output.

use crate::constants::{
    DELTA_DISPLAY_SCALE, DEPTH_COEFF_A, DEPTH_COEFF_B, DEPTH_DISPLAY_SCALE, DEPTH_INVALID_FILL_M,
    DEPTH_MAX_VALID_RAW,
};
use ndarray::{Array2, Array3, s};

/// Raw 11-bit range frame as delivered by the device
pub type RawFrame = Array2<u16>;
/// Depth frame in meters
pub type MeterFrame = Array2<f32>;
/// Per-pixel invalidity mask (`true` = no depth reading)
pub type InvalidMask = Array2<bool>;
/// Three-channel 8-bit color frame, shape (height, width, 3)
pub type VideoFrame = Array3<u8>;

/// Convert a raw frame to meters plus its invalidity mask.
///
/// Samples above [`DEPTH_MAX_VALID_RAW`] (which covers the 2047 sentinel) are
/// invalid and filled with [`DEPTH_INVALID_FILL_M`] meters so downstream math
/// stays finite.
pub fn frame_to_depth(raw: &RawFrame) -> (MeterFrame, InvalidMask) {
    let mask = raw.mapv(|v| v > DEPTH_MAX_VALID_RAW);
    let depth = raw.mapv(|v| {
        if v > DEPTH_MAX_VALID_RAW {
            DEPTH_INVALID_FILL_M
        } else {
            (1.0 / (f64::from(v) * DEPTH_COEFF_A + DEPTH_COEFF_B)) as f32
        }
    });
    (depth, mask)
}

/// Map a meter frame to an 8-bit grayscale image (near = bright).
pub fn depth_to_display(depth: &MeterFrame) -> Array2<u8> {
    depth.mapv(|m| 255u8.saturating_sub((m * DEPTH_DISPLAY_SCALE).clamp(0.0, 255.0) as u8))
}

/// Map a delta frame to an 8-bit grayscale image.
pub fn delta_to_display(delta: &MeterFrame) -> Array2<u8> {
    delta.mapv(|d| (d * DELTA_DISPLAY_SCALE).clamp(0.0, 255.0) as u8)
}

/// Flip a raw frame along both axes (180-degree rotation).
pub fn flip_raw(frame: &RawFrame) -> RawFrame {
    frame.slice(s![..;-1, ..;-1]).to_owned()
}

/// Flip a video frame along both spatial axes, keeping channel order.
pub fn flip_video(frame: &VideoFrame) -> VideoFrame {
    frame.slice(s![..;-1, ..;-1, ..]).to_owned()
}
