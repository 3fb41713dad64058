// SPDX-License-Identifier: GPL-3.0-only

//! Motion detector
//!
//! Consumes the depth stream at decimation 5 and maintains a slowly-decaying
//! reference model of the quiet scene. Each frame is clamped against the
//! optional clip mask, blurred, and compared against the reference; summed
//! depth deltas and newly-invalid pixel counts above their thresholds latch
//! the shared detection flag. The reference and its validity buffer follow
//! the scene with a per-pixel exponential moving average, frozen wherever
//! the current frame has no data.
//!
//! [`MotionPipeline`] is synchronous and owns no threads; [`MotionSensor`]
//! runs it on its own thread, fed from the hub.

use crate::config::DetectorConfig;
use crate::constants::{CLIP_MASK_FILE, DEPTH_INVALID_RAW};
use crate::frame::{InvalidMask, MeterFrame, RawFrame, frame_to_depth};
use crate::hub::StreamHub;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::Norm;
use ndarray::{Array2, Zip};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// The detector reads every 5th depth frame
pub const DETECTOR_DECIMATE: u64 = 5;

/// Per-frame detector output once the reference model is established
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// Sum of the thresholded, blurred depth deltas
    pub motion: f32,
    /// Pixels newly invalid relative to the reference
    pub lost: usize,
    /// Whether either score exceeded its threshold
    pub triggered: bool,
}

enum Phase {
    /// Dropping frames until enough pixels carry valid depth
    AwaitingValidity,
    /// Dropping frames while the sensor image settles
    Stabilizing { remaining: u32 },
    /// Reference established, scoring every frame
    Tracking {
        reference: MeterFrame,
        ref_mask_buf: Array2<f32>,
    },
}

/// The detection math, one frame at a time.
pub struct MotionPipeline {
    cfg: DetectorConfig,
    clip: Option<Array2<f32>>,
    phase: Phase,
}

impl MotionPipeline {
    pub fn new(cfg: DetectorConfig, clip: Option<Array2<f32>>) -> Self {
        Self {
            cfg,
            clip,
            phase: Phase::AwaitingValidity,
        }
    }

    /// Load the clip mask from its canonical file. Absence is normal and
    /// simply disables clamping.
    pub fn load_clip_mask() -> Option<Array2<f32>> {
        match ndarray_npy::read_npy::<_, Array2<f32>>(CLIP_MASK_FILE) {
            Ok(mask) => {
                info!(file = CLIP_MASK_FILE, "Loaded depth clip mask");
                Some(mask)
            }
            Err(e) => {
                debug!(file = CLIP_MASK_FILE, error = %e, "Running without clip mask");
                None
            }
        }
    }

    /// Feed one raw frame. Returns `None` during startup (validity gate,
    /// stabilization drop, reference capture) and an [`Observation`] for
    /// every frame after that.
    pub fn observe(&mut self, raw: &RawFrame) -> Option<Observation> {
        match &mut self.phase {
            Phase::AwaitingValidity => {
                let valid = raw.iter().filter(|&&v| v != DEPTH_INVALID_RAW).count();
                if valid >= self.cfg.valid_threshold {
                    self.phase = Phase::Stabilizing {
                        remaining: self.cfg.stabilization_frames,
                    };
                }
                None
            }
            Phase::Stabilizing { remaining } if *remaining > 0 => {
                *remaining -= 1;
                None
            }
            Phase::Stabilizing { .. } => {
                let (depth, mask) = self.prepare(raw);
                self.phase = Phase::Tracking {
                    reference: depth,
                    ref_mask_buf: mask.mapv(|b| if b { 1.0 } else { 0.0 }),
                };
                debug!("Reference frame captured");
                None
            }
            Phase::Tracking { .. } => {
                let (depth, mask) = self.prepare(raw);
                let Phase::Tracking {
                    reference,
                    ref_mask_buf,
                } = &mut self.phase
                else {
                    unreachable!()
                };
                Some(track(&self.cfg, reference, ref_mask_buf, &depth, &mask))
            }
        }
    }

    /// Convert, clamp, and blur one raw frame.
    fn prepare(&self, raw: &RawFrame) -> (MeterFrame, InvalidMask) {
        let (mut depth, mask) = frame_to_depth(raw);
        if let Some(clip) = &self.clip {
            if clip.dim() == depth.dim() {
                Zip::from(&mut depth).and(clip).for_each(|d, &c| {
                    if *d > c {
                        *d = c;
                    }
                });
            }
        }
        (gaussian(&depth, self.cfg.frame_sigma), mask)
    }
}

/// Score one prepared frame against the reference and decay the reference
/// toward it.
fn track(
    cfg: &DetectorConfig,
    reference: &mut MeterFrame,
    ref_mask_buf: &mut Array2<f32>,
    depth: &MeterFrame,
    mask: &InvalidMask,
) -> Observation {
    let ref_mask = ref_mask_buf.mapv(|v| v > 0.5);

    // Pixels invalid in either image, grown so comparison never grazes the
    // noisy rim of an invalid region
    let combined = Zip::from(mask)
        .and(&ref_mask)
        .map_collect(|&m, &r| m || r);
    let invalid = dilate_mask(&combined, cfg.dilate_radius);

    let mut lost = 0usize;
    Zip::from(mask).and(&ref_mask).for_each(|&m, &r| {
        if m && !r {
            lost += 1;
        }
    });

    let mut delta = Zip::from(&*reference)
        .and(depth)
        .and(&invalid)
        .map_collect(|&r, &d, &inv| if inv { 0.0 } else { (r - d).abs() });
    delta = gaussian(&delta, cfg.delta_sigma);
    delta.mapv_inplace(|d| if d < cfg.z_threshold { 0.0 } else { d });
    let motion = delta.sum();

    let k = cfg.decay_k;
    Zip::from(&mut *reference)
        .and(mask)
        .and(depth)
        .for_each(|r, &m, &d| {
            let target = if m { *r } else { d };
            *r = *r * (1.0 - k) + target * k;
        });
    Zip::from(ref_mask_buf).and(mask).for_each(|b, &m| {
        *b = *b * (1.0 - k) + f32::from(m) * k;
    });

    Observation {
        motion,
        lost,
        triggered: motion > cfg.motion_threshold || lost > cfg.lost_threshold,
    }
}

fn gaussian(frame: &MeterFrame, sigma: f32) -> MeterFrame {
    let (h, w) = frame.dim();
    let buf: Vec<f32> = frame.iter().copied().collect();
    let img: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(w as u32, h as u32, buf).expect("frame buffer size");
    let blurred = imageproc::filter::gaussian_blur_f32(&img, sigma);
    Array2::from_shape_vec((h, w), blurred.into_raw()).expect("frame buffer size")
}

fn dilate_mask(mask: &InvalidMask, radius: u8) -> InvalidMask {
    let (h, w) = mask.dim();
    let buf: Vec<u8> = mask.iter().map(|&b| if b { 255 } else { 0 }).collect();
    let img = GrayImage::from_raw(w as u32, h as u32, buf).expect("mask buffer size");
    let dilated = imageproc::morphology::dilate(&img, Norm::L2, radius);
    Array2::from_shape_vec((h, w), dilated.into_raw())
        .expect("mask buffer size")
        .mapv(|v| v > 0)
}

/// Detector thread plus the latching detection flag it shares with the
/// controller.
///
/// Each [`start`](MotionSensor::start) takes a fresh depth subscription and
/// a fresh [`MotionPipeline`], so re-arming always rebuilds the reference
/// model from scratch. The stop flag is observed between frames; the hub
/// closing the subscription also ends the thread.
pub struct MotionSensor {
    detected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MotionSensor {
    pub fn new() -> Self {
        Self {
            detected: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// The shared detection flag. Set by the detector, cleared by the
    /// controller when re-entering the armed state.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.detected)
    }

    pub fn is_detected(&self) -> bool {
        self.detected.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.detected.store(false, Ordering::SeqCst);
    }

    /// Start the detector over a fresh subscription and a fresh reference
    /// model. No-op when already running.
    pub fn start(&mut self, hub: &Arc<StreamHub>, cfg: &DetectorConfig) {
        if self.thread.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        info!("Motion detection started");

        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let detected = Arc::clone(&self.detected);
        let cfg = cfg.clone();
        let hub = Arc::clone(hub);
        let thread = std::thread::Builder::new()
            .name("motion-sensor".to_string())
            .spawn(move || {
                let mut stream = match hub.subscribe_depth(DETECTOR_DECIMATE) {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "No depth stream, detector exiting");
                        return;
                    }
                };
                let mut pipeline = MotionPipeline::new(cfg, MotionPipeline::load_clip_mask());

                while !stop.load(Ordering::SeqCst) {
                    let raw = match stream.recv() {
                        Ok(raw) => raw,
                        Err(e) => {
                            warn!(error = %e, "Depth stream ended, detector exiting");
                            break;
                        }
                    };
                    if let Some(obs) = pipeline.observe(&raw) {
                        if obs.triggered && !detected.swap(true, Ordering::SeqCst) {
                            info!(motion = obs.motion, lost = obs.lost, "Motion detected");
                        }
                    }
                }
            })
            .expect("failed to spawn detector thread");
        self.thread = Some(thread);
    }

    /// Stop the detector thread and wait for it.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        if thread.join().is_err() {
            warn!("Detector thread panicked");
        }
        info!("Motion detection stopped");
    }
}

impl Drop for MotionSensor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Default for MotionSensor {
    fn default() -> Self {
        Self::new()
    }
}
