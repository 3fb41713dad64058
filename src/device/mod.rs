// SPDX-License-Identifier: GPL-3.0-only

//! Device driver boundary
//!
//! The hub consumes depth hardware through the [`DepthDevice`] trait: open
//! and close the sensor, start and stop the depth and video streams
//! independently, register frame callbacks, set the indicator LED, and pump
//! the device's blocking event loop. A concrete hardware binding lives
//! outside this crate; [`synthetic::SyntheticDevice`] implements the trait
//! with a generated scene so the full system runs without a sensor.

pub mod synthetic;

use crate::errors::DeviceError;
use crate::frame::{RawFrame, VideoFrame};
use std::ops::ControlFlow;

/// Indicator LED states supported by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    Green,
    Red,
    Yellow,
    BlinkRedYellow,
    BlinkGreen,
}

/// Callback invoked with each depth frame while the depth stream runs
pub type DepthCallback = Box<dyn FnMut(RawFrame) + Send>;
/// Callback invoked with each video frame while the video stream runs
pub type VideoCallback = Box<dyn FnMut(VideoFrame) + Send>;

/// A depth sensor as the streaming hub consumes it.
///
/// Implementations configure the medium-resolution 11-bit depth mode and the
/// RGB video mode in [`open`](DepthDevice::open). Frame callbacks run on the
/// thread that calls [`run_loop`](DepthDevice::run_loop) and must not block
/// beyond brief lock acquisition.
pub trait DepthDevice: Send {
    /// Initialize the driver and open the sensor.
    fn open(&mut self) -> Result<(), DeviceError>;

    /// Release the sensor. Called once, after any running streams stop.
    fn close(&mut self);

    fn set_depth_callback(&mut self, cb: DepthCallback);
    fn set_video_callback(&mut self, cb: VideoCallback);

    fn start_depth(&mut self) -> Result<(), DeviceError>;
    fn stop_depth(&mut self) -> Result<(), DeviceError>;
    fn start_video(&mut self) -> Result<(), DeviceError>;
    fn stop_video(&mut self) -> Result<(), DeviceError>;

    fn set_led(&mut self, led: LedState) -> Result<(), DeviceError>;

    /// Pump device events, delivering frames to the registered callbacks,
    /// and invoke `tick` once per round. The loop returns when `tick`
    /// returns [`ControlFlow::Break`] or the device fails.
    fn run_loop(
        &mut self,
        tick: &mut dyn FnMut(&mut dyn DepthDevice) -> ControlFlow<()>,
    ) -> Result<(), DeviceError>;
}
