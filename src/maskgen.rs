// SPDX-License-Identifier: GPL-3.0-only

//! Clip-mask generator
//!
//! Calibration utility: three operator-selected depth pixels define a plane
//! (a floor, a desk, a doorway). The plane is offset 0.2 m along its normal
//! toward the camera and rasterized into a per-pixel maximum-depth grid,
//! which the motion detector uses to ignore everything beyond it. Depth is
//! interpolated across each scanline as 1/z, which is linear in the column
//! under perspective.

use crate::constants::{
    CLIP_MASK_FILE, CX, CY, DEPTH_COEFF_A, DEPTH_COEFF_B, FRAME_HEIGHT, FRAME_WIDTH, FX, FY,
};
use crate::errors::{AppError, AppResult};
use nalgebra::Vector3;
use ndarray::Array2;
use std::path::Path;
use tracing::info;

/// Distance the fitted plane is pushed toward the camera, meters
const PLANE_OFFSET_M: f64 = 0.2;
/// Raw value used when casting rays through pixel coordinates; any point
/// along the ray works
const RAY_RAW: f64 = 500.0;

/// One operator-selected depth pixel
#[derive(Debug, Clone, Copy)]
pub struct Click {
    pub u: u32,
    pub v: u32,
    pub raw: u16,
}

impl Click {
    /// Parse a `u,v,raw` command-line triple.
    pub fn parse_arg(arg: &str) -> Result<Click, String> {
        let parts: Vec<&str> = arg.split(',').collect();
        let [u, v, raw] = parts.as_slice() else {
            return Err(format!("expected u,v,raw but got '{}'", arg));
        };
        Ok(Click {
            u: u.trim().parse().map_err(|e| format!("bad u: {}", e))?,
            v: v.trim().parse().map_err(|e| format!("bad v: {}", e))?,
            raw: raw.trim().parse().map_err(|e| format!("bad raw: {}", e))?,
        })
    }
}

/// Back-project a pixel with a raw depth sample to world coordinates using
/// the pinhole-plus-depth model.
fn back_project(u: f64, v: f64, raw: f64) -> Vector3<f64> {
    let z = 1.0 / (raw * DEPTH_COEFF_A + DEPTH_COEFF_B);
    Vector3::new((u - CX) / FX * z, (CY - v) / FY * z, z)
}

/// Depth of the intersection of the ray through the origin and `ray` with
/// the plane through `point` with normal `normal`.
fn plane_depth(point: &Vector3<f64>, normal: &Vector3<f64>, ray: &Vector3<f64>) -> f64 {
    let denom = ray.dot(normal);
    if denom.abs() < f64::EPSILON {
        return f64::INFINITY;
    }
    (point.dot(normal) / denom) * ray.z
}

/// Fit the offset plane through three clicks and rasterize the per-pixel
/// depth ceiling.
pub fn generate_clip_mask(
    clicks: &[Click; 3],
    width: usize,
    height: usize,
) -> AppResult<Array2<f32>> {
    let points: Vec<Vector3<f64>> = clicks
        .iter()
        .map(|c| back_project(f64::from(c.u), f64::from(c.v), f64::from(c.raw)))
        .collect();

    let mut normal = (points[1] - points[0]).cross(&(points[2] - points[0]));
    if normal.norm() == 0.0 {
        return Err(AppError::Mask(
            "the three points are collinear, no unique plane".to_string(),
        ));
    }
    normal /= normal.norm();

    // Offset toward the camera: if the first point's distance grows, the
    // normal pointed away
    let mut offset = PLANE_OFFSET_M * normal;
    if (points[0] + offset).norm() > points[0].norm() {
        offset = -offset;
    }
    let anchor = points[0] + offset;

    let mut mask = Array2::<f32>::zeros((height, width));
    for v in 0..height {
        let ray_left = back_project(0.0, v as f64, RAY_RAW);
        let ray_right = back_project(width as f64, v as f64, RAY_RAW);
        let inv_left = 1.0 / plane_depth(&anchor, &normal, &ray_left);
        let inv_right = 1.0 / plane_depth(&anchor, &normal, &ray_right);
        for u in 0..width {
            let t = u as f64 / width as f64;
            let z = 1.0 / ((1.0 - t) * inv_left + t * inv_right);
            mask[[v, u]] = if z > 0.0 && z < 100.0 { z as f32 } else { 100.0 };
        }
    }
    Ok(mask)
}

/// Write a mask to a `.npy` file.
pub fn save_mask(path: &Path, mask: &Array2<f32>) -> AppResult<()> {
    ndarray_npy::write_npy(path, mask)
        .map_err(|e| AppError::Mask(format!("Failed to write {}: {}", path.display(), e)))
}

/// Generate the mask for the full sensor resolution and persist it to the
/// canonical file the detector loads.
pub fn generate_and_save(clicks: &[Click; 3]) -> AppResult<()> {
    let mask = generate_clip_mask(clicks, FRAME_WIDTH, FRAME_HEIGHT)?;
    save_mask(Path::new(CLIP_MASK_FILE), &mask)?;
    info!(file = CLIP_MASK_FILE, "Saved depth clip mask");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_to_meters(raw: f64) -> f64 {
        1.0 / (raw * DEPTH_COEFF_A + DEPTH_COEFF_B)
    }

    #[test]
    fn click_triples_parse() {
        let click = Click::parse_arg("320, 240, 700").unwrap();
        assert_eq!((click.u, click.v, click.raw), (320, 240, 700));
        assert!(Click::parse_arg("320,240").is_err());
        assert!(Click::parse_arg("a,b,c").is_err());
    }

    #[test]
    fn fronto_parallel_plane_rasterizes_flat() {
        // Three clicks at the same raw depth span a plane of constant z, so
        // every pixel's ceiling is that depth minus the 0.2 m offset.
        let clicks = [
            Click { u: 100, v: 100, raw: 700 },
            Click { u: 500, v: 120, raw: 700 },
            Click { u: 300, v: 400, raw: 700 },
        ];
        let mask = generate_clip_mask(&clicks, 64, 48).unwrap();
        let expected = (raw_to_meters(700.0) - PLANE_OFFSET_M) as f32;
        for &z in mask.iter() {
            assert!((z - expected).abs() < 1e-3, "{} vs {}", z, expected);
        }
    }

    #[test]
    fn offset_moves_plane_toward_camera() {
        // A slanted plane: the ceiling under the first click must sit closer
        // to the camera than the click itself.
        let clicks = [
            Click { u: 200, v: 150, raw: 650 },
            Click { u: 450, v: 180, raw: 750 },
            Click { u: 320, v: 380, raw: 700 },
        ];
        let mask = generate_clip_mask(&clicks, FRAME_WIDTH, FRAME_HEIGHT).unwrap();
        let click_depth = raw_to_meters(650.0) as f32;
        assert!(mask[[150, 200]] < click_depth);
        assert!(mask[[150, 200]] > click_depth - 2.0 * PLANE_OFFSET_M as f32);
    }

    #[test]
    fn collinear_clicks_are_rejected() {
        let clicks = [
            Click { u: 100, v: 100, raw: 700 },
            Click { u: 200, v: 100, raw: 700 },
            Click { u: 300, v: 100, raw: 700 },
        ];
        assert!(generate_clip_mask(&clicks, 64, 48).is_err());
    }

    #[test]
    fn parallel_ray_yields_no_intersection() {
        let normal = Vector3::new(0.0, 1.0, 0.0);
        let point = Vector3::new(0.0, 1.0, 0.0);
        let ray = Vector3::new(0.3, 0.0, 1.0);
        assert!(plane_depth(&point, &normal, &ray).is_infinite());
    }

    #[test]
    fn mask_round_trips_through_npy() {
        let clicks = [
            Click { u: 100, v: 100, raw: 700 },
            Click { u: 500, v: 120, raw: 700 },
            Click { u: 300, v: 400, raw: 700 },
        ];
        let mask = generate_clip_mask(&clicks, 32, 24).unwrap();
        let path = std::env::temp_dir().join(format!(
            "depthwatch-mask-{}.npy",
            std::process::id()
        ));
        save_mask(&path, &mask).unwrap();
        let loaded: Array2<f32> = ndarray_npy::read_npy(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, mask);
    }
}
