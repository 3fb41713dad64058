// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic depth device
//!
//! Generates a deterministic static scene at roughly sensor rate so the
//! daemon, detector, and previews can run without hardware. The scene is a
//! slanted wall with an invalid border, which exercises both the meter
//! conversion and the invalidity tracking.

use super::{DepthCallback, DepthDevice, LedState, VideoCallback};
use crate::constants::{DEPTH_INVALID_RAW, FRAME_HEIGHT, FRAME_WIDTH};
use crate::errors::DeviceError;
use crate::frame::{RawFrame, VideoFrame};
use ndarray::{Array2, Array3};
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::debug;

/// Frame period of the generated streams
const FRAME_PERIOD: Duration = Duration::from_millis(33);
/// Width of the invalid border around the generated scene
const BORDER: usize = 8;

pub struct SyntheticDevice {
    depth_cb: Option<DepthCallback>,
    video_cb: Option<VideoCallback>,
    depth_running: bool,
    video_running: bool,
    frame: u64,
}

impl SyntheticDevice {
    pub fn new() -> Self {
        Self {
            depth_cb: None,
            video_cb: None,
            depth_running: false,
            video_running: false,
            frame: 0,
        }
    }

    fn depth_frame(&self) -> RawFrame {
        Array2::from_shape_fn((FRAME_HEIGHT, FRAME_WIDTH), |(y, x)| {
            if y < BORDER || y >= FRAME_HEIGHT - BORDER || x < BORDER || x >= FRAME_WIDTH - BORDER {
                DEPTH_INVALID_RAW
            } else {
                // Slanted wall, raw 600 at the left edge to 800 at the right
                600 + (x * 200 / FRAME_WIDTH) as u16
            }
        })
    }

    fn video_frame(&self) -> VideoFrame {
        let phase = (self.frame % 256) as u8;
        Array3::from_shape_fn((FRAME_HEIGHT, FRAME_WIDTH, 3), |(y, x, c)| match c {
            0 => (x * 255 / FRAME_WIDTH) as u8,
            1 => (y * 255 / FRAME_HEIGHT) as u8,
            _ => phase,
        })
    }
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DepthDevice for SyntheticDevice {
    fn open(&mut self) -> Result<(), DeviceError> {
        debug!("Synthetic device opened");
        Ok(())
    }

    fn close(&mut self) {
        debug!("Synthetic device closed");
    }

    fn set_depth_callback(&mut self, cb: DepthCallback) {
        self.depth_cb = Some(cb);
    }

    fn set_video_callback(&mut self, cb: VideoCallback) {
        self.video_cb = Some(cb);
    }

    fn start_depth(&mut self) -> Result<(), DeviceError> {
        self.depth_running = true;
        Ok(())
    }

    fn stop_depth(&mut self) -> Result<(), DeviceError> {
        self.depth_running = false;
        Ok(())
    }

    fn start_video(&mut self) -> Result<(), DeviceError> {
        self.video_running = true;
        Ok(())
    }

    fn stop_video(&mut self) -> Result<(), DeviceError> {
        self.video_running = false;
        Ok(())
    }

    fn set_led(&mut self, led: LedState) -> Result<(), DeviceError> {
        debug!(?led, "Synthetic device LED");
        Ok(())
    }

    fn run_loop(
        &mut self,
        tick: &mut dyn FnMut(&mut dyn DepthDevice) -> ControlFlow<()>,
    ) -> Result<(), DeviceError> {
        loop {
            std::thread::sleep(FRAME_PERIOD);
            if self.depth_running {
                let frame = self.depth_frame();
                if let Some(cb) = self.depth_cb.as_mut() {
                    cb(frame);
                }
            }
            if self.video_running {
                let frame = self.video_frame();
                if let Some(cb) = self.video_cb.as_mut() {
                    cb(frame);
                }
            }
            self.frame += 1;
            if tick(self).is_break() {
                return Ok(());
            }
        }
    }
}
