// SPDX-License-Identifier: GPL-3.0-only

//! Alarm state machine
//!
//! Seven states with timed transitions, driven from the supervising thread.
//! Every state applies its LED color on entry and then waits in 1-second
//! ticks; an operator override written into the shared pending slot is
//! observed within one tick and consumed as the next state. The armed state
//! owns the motion detector's lifetime, the notify state attempts the alert
//! synchronously (failure escalates immediately), and the alarm state owns
//! the sounder.

use crate::config::{Config, DetectorConfig};
use crate::device::LedState;
use crate::hub::StreamHub;
use crate::motion::MotionSensor;
use crate::notify::Notifier;
use crate::sounder::Sounder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Alarm lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Disarmed,
    Arming,
    Armed,
    Prealarm,
    Notify,
    Alarm,
    Silenced,
}

impl AlarmState {
    pub const ALL: [AlarmState; 7] = [
        AlarmState::Disarmed,
        AlarmState::Arming,
        AlarmState::Armed,
        AlarmState::Prealarm,
        AlarmState::Notify,
        AlarmState::Alarm,
        AlarmState::Silenced,
    ];

    /// Lowercase state name as used by the operator interface
    pub fn name(&self) -> &'static str {
        match self {
            AlarmState::Disarmed => "disarmed",
            AlarmState::Arming => "arming",
            AlarmState::Armed => "armed",
            AlarmState::Prealarm => "prealarm",
            AlarmState::Notify => "notify",
            AlarmState::Alarm => "alarm",
            AlarmState::Silenced => "silenced",
        }
    }

    /// Parse an operator-supplied state name; anything unknown is `None`.
    pub fn parse(name: &str) -> Option<AlarmState> {
        AlarmState::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Capitalized name for display
    pub fn display_name(&self) -> String {
        let name = self.name();
        let mut out = String::with_capacity(name.len());
        let mut chars = name.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
        }
        out.push_str(chars.as_str());
        out
    }

    fn led(&self) -> LedState {
        match self {
            AlarmState::Disarmed => LedState::Green,
            AlarmState::Arming => LedState::BlinkGreen,
            AlarmState::Armed => LedState::Yellow,
            AlarmState::Prealarm => LedState::BlinkRedYellow,
            AlarmState::Notify | AlarmState::Alarm | AlarmState::Silenced => LedState::Red,
        }
    }
}

/// State shared between the controller thread and the web surface.
pub struct ControlShared {
    pending: Mutex<Option<AlarmState>>,
    current: Mutex<AlarmState>,
    keep_running: AtomicBool,
}

impl ControlShared {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            current: Mutex::new(AlarmState::Disarmed),
            keep_running: AtomicBool::new(true),
        }
    }

    /// The state the controller is currently executing.
    pub fn current(&self) -> AlarmState {
        *self.current.lock().expect("controller lock poisoned")
    }

    /// Queue an operator override. Unknown names and the currently executing
    /// state are silently ignored.
    pub fn request_state(&self, name: &str) {
        let Some(state) = AlarmState::parse(name) else {
            return;
        };
        if state == self.current() {
            return;
        }
        info!(state = state.name(), "Operator state override");
        *self.pending.lock().expect("controller lock poisoned") = Some(state);
    }

    /// Ask the controller loop to exit at its next tick.
    pub fn shutdown(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.keep_running.load(Ordering::SeqCst)
    }

    fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .expect("controller lock poisoned")
            .is_some()
    }

    fn take_pending(&self) -> Option<AlarmState> {
        self.pending
            .lock()
            .expect("controller lock poisoned")
            .take()
    }

    fn set_current(&self, state: AlarmState) {
        *self.current.lock().expect("controller lock poisoned") = state;
    }
}

impl Default for ControlShared {
    fn default() -> Self {
        Self::new()
    }
}

/// State timers, all counted in controller ticks.
#[derive(Debug, Clone)]
pub struct Timings {
    pub arm_time: u64,
    pub prealarm_grace: u64,
    pub notify_timeout: u64,
    /// One tick; the ceiling on operator-override latency
    pub tick: Duration,
}

impl Timings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            arm_time: cfg.arm_time,
            prealarm_grace: cfg.prealarm_grace,
            notify_timeout: cfg.notify_timeout,
            tick: Duration::from_secs(1),
        }
    }
}

enum Wait {
    Completed,
    Interrupted,
}

/// The supervising state machine.
pub struct Controller {
    hub: Arc<StreamHub>,
    shared: Arc<ControlShared>,
    sensor: MotionSensor,
    detector_cfg: DetectorConfig,
    timings: Timings,
    notifier: Box<dyn Notifier>,
    sounder: Box<dyn Sounder>,
}

impl Controller {
    pub fn new(
        hub: Arc<StreamHub>,
        shared: Arc<ControlShared>,
        detector_cfg: DetectorConfig,
        timings: Timings,
        notifier: Box<dyn Notifier>,
        sounder: Box<dyn Sounder>,
    ) -> Self {
        Self {
            hub,
            shared,
            sensor: MotionSensor::new(),
            detector_cfg,
            timings,
            notifier,
            sounder,
        }
    }

    /// The shared detection flag, latched by the detector and cleared on
    /// entering the armed state.
    pub fn detection_flag(&self) -> Arc<AtomicBool> {
        self.sensor.flag()
    }

    /// Run the state machine until [`ControlShared::shutdown`].
    pub fn run(&mut self) {
        warn!("Alarm controller starting");
        let mut state = AlarmState::Disarmed;
        while self.shared.is_running() {
            self.shared.set_current(state);
            let natural = self.execute(state);
            if let Some(next) = self.shared.take_pending().or(natural) {
                state = next;
            }
        }
        // Release side effects regardless of the state we stopped in
        if let Err(e) = self.sounder.deactivate() {
            warn!(error = %e, "Failed to release sounder on shutdown");
        }
        self.sensor.stop();
        warn!("Alarm controller stopped");
    }

    /// Execute one state to completion. `Some` is the natural successor; a
    /// pending override or shutdown yields `None`.
    fn execute(&mut self, state: AlarmState) -> Option<AlarmState> {
        match state {
            AlarmState::Disarmed => {
                info!("State: DISARMED");
                self.hub.set_led(state.led());
                self.wait(None);
                None
            }
            AlarmState::Arming => {
                info!("State: ARMING");
                self.hub.set_led(state.led());
                match self.wait(Some(self.timings.arm_time)) {
                    Wait::Completed => Some(AlarmState::Armed),
                    Wait::Interrupted => None,
                }
            }
            AlarmState::Armed => self.run_armed(),
            AlarmState::Prealarm => {
                info!("State: PREALARM");
                self.hub.set_led(state.led());
                match self.wait(Some(self.timings.prealarm_grace)) {
                    Wait::Completed => Some(AlarmState::Notify),
                    Wait::Interrupted => None,
                }
            }
            AlarmState::Notify => {
                warn!("State: NOTIFY");
                self.hub.set_led(state.led());
                match self.notifier.send_alert("Motion detected") {
                    Err(e) => {
                        error!(error = %e, "Alert failed!");
                        Some(AlarmState::Alarm)
                    }
                    Ok(()) => match self.wait(Some(self.timings.notify_timeout)) {
                        Wait::Completed => Some(AlarmState::Alarm),
                        Wait::Interrupted => None,
                    },
                }
            }
            AlarmState::Alarm => {
                warn!("State: ALARM");
                self.hub.set_led(state.led());
                if let Err(e) = self.sounder.activate() {
                    error!(error = %e, "Failed to activate sounder, alarm state continues");
                }
                self.wait(None);
                if let Err(e) = self.sounder.deactivate() {
                    warn!(error = %e, "Failed to deactivate sounder");
                }
                None
            }
            AlarmState::Silenced => {
                warn!("State: SILENCED");
                self.hub.set_led(state.led());
                self.wait(None);
                None
            }
        }
    }

    fn run_armed(&mut self) -> Option<AlarmState> {
        info!("State: ARMED");
        self.hub.set_led(AlarmState::Armed.led());
        self.sensor.start(&self.hub, &self.detector_cfg);
        self.sensor.clear();

        let next = loop {
            std::thread::sleep(self.timings.tick);
            if self.sensor.is_detected() {
                break Some(AlarmState::Prealarm);
            }
            if !self.shared.is_running() || self.shared.has_pending() {
                break None;
            }
        };

        self.sensor.stop();
        next
    }

    /// Sleep in ticks, `ticks = None` meaning indefinitely, returning early
    /// when an override or shutdown arrives.
    fn wait(&self, ticks: Option<u64>) -> Wait {
        let mut elapsed = 0;
        loop {
            if let Some(n) = ticks {
                if elapsed >= n {
                    return Wait::Completed;
                }
            }
            std::thread::sleep(self.timings.tick);
            elapsed += 1;
            if !self.shared.is_running() || self.shared.has_pending() {
                return Wait::Interrupted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DepthCallback, DepthDevice, VideoCallback};
    use crate::errors::{AppError, AppResult, DeviceError};
    use ndarray::Array2;
    use std::ops::ControlFlow;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    /// Device that streams tiny depth frames and records LED changes.
    struct TestDevice {
        depth_cb: Option<DepthCallback>,
        depth_running: bool,
        leds: Arc<Mutex<Vec<LedState>>>,
    }

    impl TestDevice {
        fn new(leds: Arc<Mutex<Vec<LedState>>>) -> Self {
            Self {
                depth_cb: None,
                depth_running: false,
                leds,
            }
        }
    }

    impl DepthDevice for TestDevice {
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
        fn set_led(&mut self, led: LedState) -> Result<(), DeviceError> {
            self.leds.lock().unwrap().push(led);
            Ok(())
        }
        fn run_loop(
            &mut self,
            tick: &mut dyn FnMut(&mut dyn DepthDevice) -> ControlFlow<()>,
        ) -> Result<(), DeviceError> {
            loop {
                std::thread::sleep(Duration::from_millis(1));
                if self.depth_running {
                    if let Some(cb) = self.depth_cb.as_mut() {
                        cb(Array2::from_elem((4, 4), 500u16));
                    }
                }
                if tick(self).is_break() {
                    return Ok(());
                }
            }
        }
    }

    struct TestNotifier {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    impl Notifier for TestNotifier {
        fn send_alert(&self, _subject: &str) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::Notify("mailer unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct TestSounder {
        active: Arc<AtomicBool>,
        activations: Arc<AtomicU32>,
    }

    impl Sounder for TestSounder {
        fn activate(&mut self) -> AppResult<()> {
            self.active.store(true, Ordering::SeqCst);
            self.activations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn deactivate(&mut self) -> AppResult<()> {
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        shared: Arc<ControlShared>,
        hub: Arc<StreamHub>,
        leds: Arc<Mutex<Vec<LedState>>>,
        notify_calls: Arc<AtomicU32>,
        sounder_active: Arc<AtomicBool>,
        detection: Arc<AtomicBool>,
        thread: std::thread::JoinHandle<()>,
    }

    fn start_controller(timings: Timings, notify_fails: bool) -> Fixture {
        let leds = Arc::new(Mutex::new(Vec::new()));
        let hub = StreamHub::start(Box::new(TestDevice::new(Arc::clone(&leds))), false);
        let shared = Arc::new(ControlShared::new());
        let notify_calls = Arc::new(AtomicU32::new(0));
        let sounder_active = Arc::new(AtomicBool::new(false));

        let mut controller = Controller::new(
            Arc::clone(&hub),
            Arc::clone(&shared),
            DetectorConfig::default(),
            timings,
            Box::new(TestNotifier {
                calls: Arc::clone(&notify_calls),
                fail: notify_fails,
            }),
            Box::new(TestSounder {
                active: Arc::clone(&sounder_active),
                activations: Arc::new(AtomicU32::new(0)),
            }),
        );
        let detection = controller.detection_flag();
        let thread = std::thread::spawn(move || controller.run());

        Fixture {
            shared,
            hub,
            leds,
            notify_calls,
            sounder_active,
            detection,
            thread,
        }
    }

    fn fast_timings() -> Timings {
        Timings {
            arm_time: 2,
            prealarm_grace: 2,
            notify_timeout: 2,
            tick: Duration::from_millis(10),
        }
    }

    fn wait_for_state(shared: &ControlShared, state: AlarmState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if shared.current() == state {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("timed out waiting for {:?}, stuck in {:?}", state, shared.current());
    }

    fn shut_down(fixture: Fixture) {
        fixture.shared.shutdown();
        fixture.thread.join().unwrap();
        fixture.hub.stop();
    }

    #[test]
    fn state_names_round_trip() {
        for state in AlarmState::ALL {
            assert_eq!(AlarmState::parse(state.name()), Some(state));
        }
        assert_eq!(AlarmState::parse("explode"), None);
        assert_eq!(AlarmState::Prealarm.display_name(), "Prealarm");
    }

    #[test]
    fn unknown_and_current_state_requests_are_ignored() {
        let shared = ControlShared::new();
        shared.request_state("explode");
        assert!(!shared.has_pending());
        // Disarmed is the current state, so requesting it is a no-op
        shared.request_state("disarmed");
        assert!(!shared.has_pending());
        shared.request_state("arming");
        assert_eq!(shared.take_pending(), Some(AlarmState::Arming));
    }

    #[test]
    fn full_alarm_chain() {
        let fixture = start_controller(fast_timings(), false);

        fixture.shared.request_state("arming");
        wait_for_state(&fixture.shared, AlarmState::Arming);
        wait_for_state(&fixture.shared, AlarmState::Armed);

        // Quiet scene keeps the system armed
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fixture.shared.current(), AlarmState::Armed);

        fixture.detection.store(true, Ordering::SeqCst);
        wait_for_state(&fixture.shared, AlarmState::Prealarm);
        wait_for_state(&fixture.shared, AlarmState::Notify);
        wait_for_state(&fixture.shared, AlarmState::Alarm);

        assert_eq!(fixture.notify_calls.load(Ordering::SeqCst), 1);
        assert!(fixture.sounder_active.load(Ordering::SeqCst));

        fixture.shared.request_state("disarmed");
        wait_for_state(&fixture.shared, AlarmState::Disarmed);
        assert!(!fixture.sounder_active.load(Ordering::SeqCst));

        shut_down(fixture);
    }

    #[test]
    fn notification_failure_escalates_immediately() {
        let mut timings = fast_timings();
        // A failed alert must not wait out this timeout
        timings.notify_timeout = 10_000;
        let fixture = start_controller(timings, true);

        fixture.shared.request_state("prealarm");
        wait_for_state(&fixture.shared, AlarmState::Alarm);

        assert_eq!(fixture.notify_calls.load(Ordering::SeqCst), 1);
        assert!(fixture.sounder_active.load(Ordering::SeqCst));

        shut_down(fixture);
    }

    #[test]
    fn override_interrupts_arming() {
        let mut timings = fast_timings();
        timings.arm_time = 10_000;
        let fixture = start_controller(timings, false);

        fixture.shared.request_state("arming");
        wait_for_state(&fixture.shared, AlarmState::Arming);
        fixture.shared.request_state("disarmed");
        wait_for_state(&fixture.shared, AlarmState::Disarmed);

        // The disarmed LED request reaches the device
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if fixture.leds.lock().unwrap().last() == Some(&LedState::Green) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fixture.leds.lock().unwrap().last(), Some(&LedState::Green));

        shut_down(fixture);
    }

    #[test]
    fn silenced_is_reachable_only_by_override() {
        let fixture = start_controller(fast_timings(), false);

        fixture.shared.request_state("silenced");
        wait_for_state(&fixture.shared, AlarmState::Silenced);
        // No timer moves silenced anywhere
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fixture.shared.current(), AlarmState::Silenced);

        shut_down(fixture);
    }
}
