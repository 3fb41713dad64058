// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end alarm scenarios: a scripted device streams a controllable
//! scene through the real hub into the real motion detector, and the
//! controller reacts with stubbed notification and sounder side effects.

use depthwatch::config::DetectorConfig;
use depthwatch::controller::{AlarmState, ControlShared, Controller, Timings};
use depthwatch::device::{DepthCallback, DepthDevice, LedState, VideoCallback};
use depthwatch::errors::{AppError, AppResult, DeviceError};
use depthwatch::hub::StreamHub;
use depthwatch::notify::Notifier;
use depthwatch::sounder::Sounder;
use ndarray::Array2;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SCENE_SIZE: usize = 32;

/// Streams flat depth frames at whatever raw value the test sets.
struct ScriptedDevice {
    scene: Arc<AtomicU16>,
    depth_cb: Option<DepthCallback>,
    depth_running: bool,
}

impl DepthDevice for ScriptedDevice {
    fn open(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
    fn close(&mut self) {}
    fn set_depth_callback(&mut self, cb: DepthCallback) {
        self.depth_cb = Some(cb);
    }
    fn set_video_callback(&mut self, _cb: VideoCallback) {}
    fn start_depth(&mut self) -> Result<(), DeviceError> {
        self.depth_running = true;
        Ok(())
    }
    fn stop_depth(&mut self) -> Result<(), DeviceError> {
        self.depth_running = false;
        Ok(())
    }
    fn start_video(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
    fn stop_video(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
    fn set_led(&mut self, _led: LedState) -> Result<(), DeviceError> {
        Ok(())
    }
    fn run_loop(
        &mut self,
        tick: &mut dyn FnMut(&mut dyn DepthDevice) -> ControlFlow<()>,
    ) -> Result<(), DeviceError> {
        loop {
            std::thread::sleep(Duration::from_millis(1));
            if self.depth_running {
                let raw = self.scene.load(Ordering::SeqCst);
                if let Some(cb) = self.depth_cb.as_mut() {
                    cb(Array2::from_elem((SCENE_SIZE, SCENE_SIZE), raw));
                }
            }
            if tick(self).is_break() {
                return Ok(());
            }
        }
    }
}

struct StubNotifier {
    calls: Arc<AtomicU32>,
}

impl Notifier for StubNotifier {
    fn send_alert(&self, _subject: &str) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StubSounder {
    active: Arc<AtomicBool>,
}

impl Sounder for StubSounder {
    fn activate(&mut self) -> AppResult<()> {
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn deactivate(&mut self) -> AppResult<()> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn send_alert(&self, _subject: &str) -> AppResult<()> {
        Err(AppError::Notify("relay refused".to_string()))
    }
}

fn detector_config() -> DetectorConfig {
    DetectorConfig {
        // Half the 32x32 scripted scene
        valid_threshold: 512,
        z_threshold: 0.05,
        motion_threshold: 1.0,
        lost_threshold: 100,
        decay_k: 0.01,
        stabilization_frames: 2,
        frame_sigma: 2.0,
        delta_sigma: 1.0,
        dilate_radius: 2,
    }
}

fn timings() -> Timings {
    Timings {
        arm_time: 1,
        prealarm_grace: 1,
        notify_timeout: 1,
        tick: Duration::from_millis(10),
    }
}

fn wait_for_state(shared: &ControlShared, state: AlarmState) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if shared.current() == state {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!(
        "timed out waiting for {:?}, stuck in {:?}",
        state,
        shared.current()
    );
}

#[test]
fn motion_in_an_armed_scene_raises_the_alarm() {
    let scene = Arc::new(AtomicU16::new(500));
    let hub = StreamHub::start(
        Box::new(ScriptedDevice {
            scene: Arc::clone(&scene),
            depth_cb: None,
            depth_running: false,
        }),
        false,
    );

    let shared = Arc::new(ControlShared::new());
    let notify_calls = Arc::new(AtomicU32::new(0));
    let sounder_active = Arc::new(AtomicBool::new(false));

    let mut controller = Controller::new(
        Arc::clone(&hub),
        Arc::clone(&shared),
        detector_config(),
        timings(),
        Box::new(StubNotifier {
            calls: Arc::clone(&notify_calls),
        }),
        Box::new(StubSounder {
            active: Arc::clone(&sounder_active),
        }),
    );
    let control = Arc::clone(&shared);
    let thread = std::thread::spawn(move || controller.run());

    control.request_state("arming");
    wait_for_state(&shared, AlarmState::Armed);

    // Let the detector burn in and settle on the quiet scene
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(shared.current(), AlarmState::Armed, "quiet scene must not trigger");

    // Something moves into the scene
    scene.store(900, Ordering::SeqCst);
    wait_for_state(&shared, AlarmState::Prealarm);
    wait_for_state(&shared, AlarmState::Notify);
    wait_for_state(&shared, AlarmState::Alarm);

    assert_eq!(notify_calls.load(Ordering::SeqCst), 1);
    assert!(sounder_active.load(Ordering::SeqCst), "sounder must be on in alarm");

    shared.request_state("disarmed");
    wait_for_state(&shared, AlarmState::Disarmed);
    assert!(!sounder_active.load(Ordering::SeqCst), "sounder must stop on disarm");

    shared.shutdown();
    thread.join().unwrap();
    hub.stop();
}

#[test]
fn failed_notification_still_sounds_the_alarm() {
    let scene = Arc::new(AtomicU16::new(500));
    let hub = StreamHub::start(
        Box::new(ScriptedDevice {
            scene,
            depth_cb: None,
            depth_running: false,
        }),
        false,
    );

    let shared = Arc::new(ControlShared::new());
    let sounder_active = Arc::new(AtomicBool::new(false));

    let mut timings = timings();
    // A failed alert must escalate without waiting this out
    timings.notify_timeout = 10_000;

    let mut controller = Controller::new(
        Arc::clone(&hub),
        Arc::clone(&shared),
        detector_config(),
        timings,
        Box::new(FailingNotifier),
        Box::new(StubSounder {
            active: Arc::clone(&sounder_active),
        }),
    );
    let thread = std::thread::spawn(move || controller.run());

    shared.request_state("prealarm");
    wait_for_state(&shared, AlarmState::Alarm);
    assert!(sounder_active.load(Ordering::SeqCst));

    shared.shutdown();
    thread.join().unwrap();
    hub.stop();
}
