// SPDX-License-Identifier: GPL-3.0-only

//! Streaming hub
//!
//! A single thread owns the depth device and pumps its blocking event loop.
//! Frames fan out to any number of subscribers, each with its own decimation
//! factor and a single-slot channel: a fresh frame overwrites an unconsumed
//! one, so a slow consumer sees the latest frame instead of a backlog, and
//! the producer never blocks.
//!
//! Device streams follow subscriber presence: the depth stream runs while at
//! least one depth subscriber exists, same for video. With no subscribers at
//! all the hub parks on a condition variable until a subscription, an LED
//! update, or shutdown arrives. When the hub dies, every live subscriber
//! receives a terminal [`HubError::Closed`] on its next read.

use crate::device::{DepthDevice, LedState};
use crate::errors::HubError;
use crate::frame::{self, RawFrame, VideoFrame};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Single-slot channel: writers overwrite, the reader takes the latest.
struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn put(&self, value: T) {
        let mut st = self.state.lock().expect("slot lock poisoned");
        st.value = Some(value);
        self.ready.notify_one();
    }

    fn close(&self) {
        let mut st = self.state.lock().expect("slot lock poisoned");
        st.closed = true;
        self.ready.notify_all();
    }

    fn take(&self) -> Result<T, HubError> {
        let mut st = self.state.lock().expect("slot lock poisoned");
        loop {
            if st.closed {
                return Err(HubError::Closed);
            }
            if let Some(value) = st.value.take() {
                return Ok(value);
            }
            st = self.ready.wait(st).expect("slot lock poisoned");
        }
    }
}

#[derive(Clone, Copy)]
enum StreamKind {
    Depth,
    Video,
}

struct SubEntry<T> {
    slot: Arc<Slot<T>>,
    decimate: u64,
}

/// A subscription to one of the hub's streams.
///
/// Iteration yields frames at the subscriber's decimation cadence and ends
/// when the hub shuts down. Dropping the stream unsubscribes.
pub struct FrameStream<T> {
    id: u64,
    kind: StreamKind,
    slot: Arc<Slot<T>>,
    shared: Arc<HubShared>,
}

pub type DepthStream = FrameStream<RawFrame>;
pub type VideoStream = FrameStream<VideoFrame>;

impl<T> FrameStream<T> {
    /// Block until the next decimated frame, or [`HubError::Closed`] once
    /// the hub has terminated.
    pub fn recv(&mut self) -> Result<T, HubError> {
        self.slot.take()
    }
}

impl<T> Iterator for FrameStream<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv().ok()
    }
}

impl<T> Drop for FrameStream<T> {
    fn drop(&mut self) {
        let mut tables = self.shared.state.lock().expect("hub lock poisoned");
        let (removed, now_empty) = match self.kind {
            StreamKind::Depth => (
                tables.depth.remove(&self.id).is_some(),
                tables.depth.is_empty(),
            ),
            StreamKind::Video => (
                tables.video.remove(&self.id).is_some(),
                tables.video.is_empty(),
            ),
        };
        if removed && now_empty {
            tables.refresh = true;
            self.shared.wakeup.notify_all();
        }
    }
}

struct HubTables {
    depth: HashMap<u64, SubEntry<RawFrame>>,
    video: HashMap<u64, SubEntry<VideoFrame>>,
    next_id: u64,
    depth_frame: u64,
    video_frame: u64,
    depth_started: bool,
    video_started: bool,
    led_update: Option<LedState>,
    keep_running: bool,
    refresh: bool,
    closed: bool,
}

impl HubTables {
    fn new() -> Self {
        Self {
            depth: HashMap::new(),
            video: HashMap::new(),
            next_id: 0,
            depth_frame: 0,
            video_frame: 0,
            depth_started: false,
            video_started: false,
            led_update: None,
            keep_running: true,
            refresh: false,
            closed: false,
        }
    }

    /// Deliver a depth frame to every subscriber whose decimation matches
    /// the global depth counter.
    fn fan_out_depth(&mut self, frame: RawFrame) {
        for entry in self.depth.values() {
            if self.depth_frame % entry.decimate == 0 {
                entry.slot.put(frame.clone());
            }
        }
        self.depth_frame += 1;
    }

    /// Deliver a video frame; viewers post-process, so each gets a copy.
    fn fan_out_video(&mut self, frame: VideoFrame) {
        for entry in self.video.values() {
            if self.video_frame % entry.decimate == 0 {
                entry.slot.put(frame.clone());
            }
        }
        self.video_frame += 1;
    }
}

struct HubShared {
    state: Mutex<HubTables>,
    wakeup: Condvar,
}

/// Handle to the streaming hub thread.
pub struct StreamHub {
    shared: Arc<HubShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl StreamHub {
    /// Spawn the hub thread over `device`. With `invert` set, every frame is
    /// rotated 180 degrees before fan-out.
    pub fn start(device: Box<dyn DepthDevice>, invert: bool) -> Arc<StreamHub> {
        let shared = Arc::new(HubShared {
            state: Mutex::new(HubTables::new()),
            wakeup: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("streamer".to_string())
            .spawn(move || hub_thread(thread_shared, device, invert))
            .expect("failed to spawn streamer thread");
        info!("Streamer started");
        Arc::new(StreamHub {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Subscribe to the depth stream; every `decimate`-th frame is delivered.
    pub fn subscribe_depth(&self, decimate: u64) -> Result<DepthStream, HubError> {
        let decimate = decimate.max(1);
        let mut tables = self.shared.state.lock().expect("hub lock poisoned");
        if tables.closed {
            return Err(HubError::Closed);
        }
        let id = tables.next_id;
        tables.next_id += 1;
        let slot = Arc::new(Slot::new());
        tables.depth.insert(
            id,
            SubEntry {
                slot: Arc::clone(&slot),
                decimate,
            },
        );
        if tables.depth.len() == 1 {
            tables.refresh = true;
            self.shared.wakeup.notify_all();
        }
        Ok(FrameStream {
            id,
            kind: StreamKind::Depth,
            slot,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Subscribe to the video stream; every `decimate`-th frame is delivered.
    pub fn subscribe_video(&self, decimate: u64) -> Result<VideoStream, HubError> {
        let decimate = decimate.max(1);
        let mut tables = self.shared.state.lock().expect("hub lock poisoned");
        if tables.closed {
            return Err(HubError::Closed);
        }
        let id = tables.next_id;
        tables.next_id += 1;
        let slot = Arc::new(Slot::new());
        tables.video.insert(
            id,
            SubEntry {
                slot: Arc::clone(&slot),
                decimate,
            },
        );
        if tables.video.len() == 1 {
            tables.refresh = true;
            self.shared.wakeup.notify_all();
        }
        Ok(FrameStream {
            id,
            kind: StreamKind::Video,
            slot,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Queue an LED change; the next round of the device loop applies it.
    pub fn set_led(&self, led: LedState) {
        let mut tables = self.shared.state.lock().expect("hub lock poisoned");
        if tables.closed {
            return;
        }
        tables.led_update = Some(led);
        self.shared.wakeup.notify_all();
    }

    /// Signal shutdown, drain subscribers with a terminal error, and join.
    pub fn stop(&self) {
        {
            let mut tables = self.shared.state.lock().expect("hub lock poisoned");
            tables.keep_running = false;
            tables.refresh = true;
            self.shared.wakeup.notify_all();
        }
        let handle = self.thread.lock().expect("hub lock poisoned").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Streamer thread panicked");
            }
        }
    }
}

/// Start or stop the device streams to match subscriber presence.
fn update_streams(device: &mut dyn DepthDevice, tables: &mut HubTables) {
    if tables.depth_started && tables.depth.is_empty() {
        info!("Stopping depth");
        match device.stop_depth() {
            Ok(()) => tables.depth_started = false,
            Err(e) => warn!(error = %e, "Failed to stop depth stream"),
        }
    } else if !tables.depth_started && !tables.depth.is_empty() {
        info!("Starting depth");
        match device.start_depth() {
            Ok(()) => tables.depth_started = true,
            Err(e) => warn!(error = %e, "Failed to start depth stream"),
        }
    }

    if tables.video_started && tables.video.is_empty() {
        info!("Stopping video");
        match device.stop_video() {
            Ok(()) => tables.video_started = false,
            Err(e) => warn!(error = %e, "Failed to stop video stream"),
        }
    } else if !tables.video_started && !tables.video.is_empty() {
        info!("Starting video");
        match device.start_video() {
            Ok(()) => tables.video_started = true,
            Err(e) => warn!(error = %e, "Failed to start video stream"),
        }
    }
}

fn hub_thread(shared: Arc<HubShared>, mut device: Box<dyn DepthDevice>, invert: bool) {
    if let Err(e) = device.open() {
        error!(error = %e, "Failed to open depth device");
        teardown(&shared, device.as_mut());
        return;
    }

    {
        let cb_shared = Arc::clone(&shared);
        device.set_depth_callback(Box::new(move |frame| {
            let frame = if invert { frame::flip_raw(&frame) } else { frame };
            let mut tables = cb_shared.state.lock().expect("hub lock poisoned");
            tables.fan_out_depth(frame);
        }));
    }
    {
        let cb_shared = Arc::clone(&shared);
        device.set_video_callback(Box::new(move |frame| {
            let frame = if invert {
                frame::flip_video(&frame)
            } else {
                frame
            };
            let mut tables = cb_shared.state.lock().expect("hub lock poisoned");
            tables.fan_out_video(frame);
        }));
    }

    'run: loop {
        // Park until at least one stream should run. A queued LED update is
        // applied before shutdown is re-checked.
        {
            let mut tables = shared.state.lock().expect("hub lock poisoned");
            loop {
                if let Some(led) = tables.led_update.take() {
                    if let Err(e) = device.set_led(led) {
                        warn!(error = %e, "Failed to set LED");
                    }
                }
                if !tables.keep_running {
                    break 'run;
                }
                tables.refresh = false;
                update_streams(device.as_mut(), &mut tables);
                if tables.depth_started || tables.video_started {
                    break;
                }
                debug!("No subscribers, streamer parked");
                tables = shared.wakeup.wait(tables).expect("hub lock poisoned");
            }
        }

        let tick_shared = Arc::clone(&shared);
        let result = device.run_loop(&mut move |dev| {
            let mut tables = tick_shared.state.lock().expect("hub lock poisoned");
            if let Some(led) = tables.led_update.take() {
                if let Err(e) = dev.set_led(led) {
                    warn!(error = %e, "Failed to set LED");
                }
            }
            if tables.refresh {
                tables.refresh = false;
                update_streams(dev, &mut tables);
                if !tables.depth_started && !tables.video_started {
                    return ControlFlow::Break(());
                }
            }
            if !tables.keep_running {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });

        if let Err(e) = result {
            error!(error = %e, "Device loop failed, shutting down streamer");
            break;
        }
    }

    teardown(&shared, device.as_mut());
    device.close();
    info!("Streamer stopped");
}

/// Mark the hub dead, drain subscribers with a terminal error, and stop any
/// running device streams.
fn teardown(shared: &Arc<HubShared>, device: &mut dyn DepthDevice) {
    let mut tables = shared.state.lock().expect("hub lock poisoned");
    tables.keep_running = false;
    tables.closed = true;
    for entry in tables.depth.values() {
        entry.slot.close();
    }
    for entry in tables.video.values() {
        entry.slot.close();
    }
    tables.depth.clear();
    tables.video.clear();
    update_streams(device, &mut tables);
}
