// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the alarm system

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Device-layer errors
    Device(DeviceError),
    /// Streaming-hub errors
    Hub(HubError),
    /// Configuration errors
    Config(String),
    /// Alert-notification errors
    Notify(String),
    /// Sounder activation/deactivation errors
    Sounder(String),
    /// Clip-mask generation or persistence errors
    Mask(String),
    /// Web-surface errors
    Web(String),
}

/// Depth-device errors
#[derive(Debug, Clone)]
pub enum DeviceError {
    /// Opening the device failed
    OpenFailed(String),
    /// Starting or stopping a stream failed
    StreamFailed(String),
    /// The device event loop died
    LoopFailed(String),
    /// This build carries no hardware backend
    NoBackend,
}

/// Streaming-hub errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The hub has terminated; the subscription is invalidated
    Closed,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Device(e) => write!(f, "Device error: {}", e),
            AppError::Hub(e) => write!(f, "Hub error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Notify(msg) => write!(f, "Notification error: {}", msg),
            AppError::Sounder(msg) => write!(f, "Sounder error: {}", msg),
            AppError::Mask(msg) => write!(f, "Clip-mask error: {}", msg),
            AppError::Web(msg) => write!(f, "Web error: {}", msg),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::OpenFailed(msg) => write!(f, "Failed to open device: {}", msg),
            DeviceError::StreamFailed(msg) => write!(f, "Stream control failed: {}", msg),
            DeviceError::LoopFailed(msg) => write!(f, "Device loop failed: {}", msg),
            DeviceError::NoBackend => write!(f, "No hardware backend in this build"),
        }
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::Closed => write!(f, "The streaming hub has shut down"),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for DeviceError {}
impl std::error::Error for HubError {}

impl From<DeviceError> for AppError {
    fn from(err: DeviceError) -> Self {
        AppError::Device(err)
    }
}

impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        AppError::Hub(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
