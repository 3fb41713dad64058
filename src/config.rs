// SPDX-License-Identifier: GPL-3.0-only

//! Static configuration, loaded once at startup
//!
//! All operator-tunable values live here: frame orientation, alarm timers,
//! detector thresholds, mail settings, sounder selection, and the web
//! surface. Configuration is read from a JSON file; a missing file means
//! defaults, a malformed file is an error.

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "depthwatch.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rotate all frames 180 degrees (ceiling-mounted sensor)
    pub invert_camera: bool,
    /// Seconds between the arm command and the armed state
    pub arm_time: u64,
    /// Grace seconds between motion detection and notification
    pub prealarm_grace: u64,
    /// Seconds after a successful notification before the sounder fires
    pub notify_timeout: u64,
    /// Motion detector tuning
    pub detector: DetectorConfig,
    /// Alert mail settings
    pub smtp: SmtpConfig,
    /// Shell command spawned while the alarm sounds
    pub playback_command: String,
    /// Serial device for the alternate sounder; audio playback when unset
    pub serial_port: Option<String>,
    /// Web control surface
    pub web: WebConfig,
}

/// Motion detector tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum count of valid samples before the first reference frame
    pub valid_threshold: usize,
    /// Per-pixel depth delta (meters) below which a pixel is quiet
    pub z_threshold: f32,
    /// Summed delta above which motion is reported
    pub motion_threshold: f32,
    /// Count of newly-invalid pixels above which data loss is reported
    pub lost_threshold: usize,
    /// Per-frame EMA rate for the reference model, in (0, 1)
    pub decay_k: f32,
    /// Frames dropped after the validity gate before the reference capture
    pub stabilization_frames: u32,
    /// Gaussian sigma applied to each incoming meter frame
    pub frame_sigma: f32,
    /// Gaussian sigma applied to the delta image
    pub delta_sigma: f32,
    /// Radius of the elliptical dilation kernel for invalid regions
    pub dilate_radius: u8,
}

/// Alert mail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    /// Issue STARTTLS after connecting
    pub tls: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub mail_from: String,
    pub mail_to: String,
    /// Mail body; the first `%s` is replaced with the alert subject
    pub mail_template: String,
    /// Connection and send timeout, seconds
    pub timeout: u64,
}

/// Web control surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            invert_camera: false,
            arm_time: 60,
            prealarm_grace: 30,
            notify_timeout: 60,
            detector: DetectorConfig::default(),
            smtp: SmtpConfig::default(),
            playback_command: "aplay alarm.wav".to_string(),
            serial_port: None,
            web: WebConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            // Half of a 640x480 frame
            valid_threshold: 153_600,
            z_threshold: 0.1,
            motion_threshold: 3_000.0,
            lost_threshold: 5_000,
            decay_k: 0.01,
            stabilization_frames: 30,
            frame_sigma: 2.0,
            delta_sigma: 1.0,
            dilate_radius: 5,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 25,
            tls: false,
            user: None,
            password: None,
            mail_from: "alarm@localhost".to_string(),
            mail_to: "root@localhost".to_string(),
            mail_template: "The alarm system reports: %s".to_string(),
            timeout: 30,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            username: "admin".to_string(),
            password: "changeme".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`. A missing file yields the defaults;
    /// an unreadable or malformed file is an error.
    pub fn load(path: &Path) -> AppResult<Config> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No configuration file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(AppError::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        serde_json::from_str(&data).map_err(|e| {
            AppError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}
