// SPDX-License-Identifier: GPL-3.0-only

//! Sensor constants
//!
//! Depth-range sentinels, the disparity-to-depth polynomial, and the camera
//! intrinsics used by the clip-mask generator all live here. Values are for
//! the 640x480 medium-resolution 11-bit depth mode.

/// Frame width in the medium-resolution mode
pub const FRAME_WIDTH: usize = 640;
/// Frame height in the medium-resolution mode
pub const FRAME_HEIGHT: usize = 480;

/// Sentinel reported by the sensor for pixels with no depth reading
pub const DEPTH_INVALID_RAW: u16 = 2047;
/// Raw samples above this are treated as invalid
pub const DEPTH_MAX_VALID_RAW: u16 = 1070;
/// Meters substituted at invalid pixels for computational purposes
pub const DEPTH_INVALID_FILL_M: f32 = 5.0;

/// Disparity-to-depth coefficient A
/// Used in formula: depth_m = 1.0 / (raw * DEPTH_COEFF_A + DEPTH_COEFF_B)
pub const DEPTH_COEFF_A: f64 = -0.0030711016;
/// Disparity-to-depth coefficient B
/// Used in formula: depth_m = 1.0 / (raw * DEPTH_COEFF_A + DEPTH_COEFF_B)
pub const DEPTH_COEFF_B: f64 = 3.3309495161;

/// Focal length X (pixels) at 640x480 base resolution
pub const FX: f64 = 594.21;
/// Focal length Y (pixels) at 640x480 base resolution
pub const FY: f64 = 591.04;
/// Principal point X (pixels) at 640x480 base resolution
pub const CX: f64 = 339.5;
/// Principal point Y (pixels) at 640x480 base resolution
pub const CY: f64 = 242.7;

/// Meters-to-grayscale scale for depth display images
pub const DEPTH_DISPLAY_SCALE: f32 = 30.0;
/// Delta-to-grayscale scale for difference display images
pub const DELTA_DISPLAY_SCALE: f32 = 60.0;

/// Clip-mask file written by the mask generator and read by the detector,
/// relative to the process working directory
pub const CLIP_MASK_FILE: &str = "depth_filter.npy";
