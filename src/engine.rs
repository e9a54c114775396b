// src/engine.rs
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use log::{error, info, warn};

use crate::drivers::{AcquisitionError, DeviceSession, SharedSeriesBuffer};
use crate::recorder::RecordSink;
use crate::types::{Channel, EngineEvent, Sample, SampleSet};

/// Full-failure sample sets in a row before the device is declared unresponsive.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl LoopState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }
}

#[derive(Default)]
struct Control {
    state: AtomicU8,
    halted: AtomicBool,
}

/// Read-only view on a running loop, cheap to clone into other threads.
#[derive(Clone)]
pub struct AcquisitionStatus {
    control: Arc<Control>,
}

impl AcquisitionStatus {
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.control.state.load(Ordering::Acquire))
    }

    /// True once the loop terminated because the device stopped answering.
    pub fn halted(&self) -> bool {
        self.control.halted.load(Ordering::Acquire)
    }
}

/// Totals reported by a loop that ended through `stop()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquisitionSummary {
    pub sample_sets: u64,
    pub failed_reads: u64,
    pub log_failures: u64,
}

/// Drives the device at a fixed outer cadence, feeding the buffer and the record sink.
pub struct AcquisitionLoop<D: DeviceSession> {
    device: D,
    channels: Vec<Channel>,
    buffer: SharedSeriesBuffer,
    sink: Option<Box<dyn RecordSink>>,
    interval: Duration,
    events: Sender<EngineEvent>,
    control: Arc<Control>,
}

impl<D: DeviceSession + 'static> AcquisitionLoop<D> {
    pub fn new(
        device: D,
        buffer: SharedSeriesBuffer,
        sink: Option<Box<dyn RecordSink>>,
        interval: Duration,
        events: Sender<EngineEvent>,
    ) -> Self {
        let channels = device.channels().to_vec();
        Self {
            device,
            channels,
            buffer,
            sink,
            interval,
            events,
            control: Arc::new(Control::default()),
        }
    }

    pub fn status(&self) -> AcquisitionStatus {
        AcquisitionStatus {
            control: self.control.clone(),
        }
    }

    /// Idle -> Running. The device moves into the acquisition thread and is
    /// closed there once the loop has ended.
    pub fn start(self) -> std::io::Result<AcquisitionHandle> {
        let control = self.control.clone();
        control
            .state
            .store(LoopState::Running as u8, Ordering::Release);
        let spawned = thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || self.run());
        match spawned {
            Ok(thread) => Ok(AcquisitionHandle {
                control,
                thread: Some(thread),
            }),
            Err(e) => {
                control
                    .state
                    .store(LoopState::Stopped as u8, Ordering::Release);
                Err(e)
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.control.state.load(Ordering::Acquire) != LoopState::Running as u8
    }

    fn run(mut self) -> Result<AcquisitionSummary, AcquisitionError> {
        self.events
            .send(EngineEvent::Started {
                channels: self.channels.clone(),
            })
            .ok();
        info!("acquisition started ({} channels, every {:?})", self.channels.len(), self.interval);
        let outcome = self.tick_until_stopped();
        if let Err(e) = self.device.close() {
            warn!("device close: {e}");
        }
        if let Err(e) = &outcome {
            error!("{e}");
            self.control.halted.store(true, Ordering::Release);
        }
        self.control
            .state
            .store(LoopState::Stopped as u8, Ordering::Release);
        outcome
    }

    fn tick_until_stopped(&mut self) -> Result<AcquisitionSummary, AcquisitionError> {
        let mut summary = AcquisitionSummary {
            sample_sets: 0,
            failed_reads: 0,
            log_failures: 0,
        };
        let mut consecutive = 0u32;
        while !self.stop_requested() {
            let set = self.acquire_set(&mut summary);
            consecutive = if set.all_missing() { consecutive + 1 } else { 0 };

            if let Err(e) = self.buffer.append(&set) {
                error!("buffer append: {e}");
            }
            if let Some(sink) = self.sink.as_mut() {
                if let Err(e) = sink.write(&set) {
                    summary.log_failures += 1;
                    warn!("{e}");
                    self.events.send(EngineEvent::LogFailed(e.to_string())).ok();
                }
            }
            summary.sample_sets += 1;

            if consecutive >= MAX_CONSECUTIVE_FAILURES {
                self.events
                    .send(EngineEvent::DeviceUnresponsive { consecutive })
                    .ok();
                return Err(AcquisitionError::DeviceUnresponsive { consecutive });
            }
            self.pause();
        }
        info!("acquisition stopped after {} sample sets", summary.sample_sets);
        self.events
            .send(EngineEvent::Stopped {
                sample_sets: summary.sample_sets,
            })
            .ok();
        Ok(summary)
    }

    fn acquire_set(&mut self, summary: &mut AcquisitionSummary) -> SampleSet {
        let mut samples = Vec::with_capacity(self.channels.len());
        for &channel in &self.channels {
            match self.device.acquire_one(channel) {
                Ok(mv) if mv.is_finite() => samples.push(Sample::Millivolts(mv)),
                Ok(mv) => {
                    summary.failed_reads += 1;
                    warn!("{channel}: non-finite reading {mv}");
                    samples.push(Sample::Missing);
                }
                Err(e) => {
                    summary.failed_reads += 1;
                    warn!("{e}");
                    self.events
                        .send(EngineEvent::ChannelFailed {
                            channel,
                            reason: e.to_string(),
                        })
                        .ok();
                    samples.push(Sample::Missing);
                }
            }
        }
        SampleSet::new(Local::now(), samples)
    }

    // `stop()` unparks the thread, so a stop is seen without waiting out the interval.
    fn pause(&self) {
        let deadline = Instant::now() + self.interval;
        loop {
            if self.stop_requested() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::park_timeout(deadline - now);
        }
    }
}

/// Owner-side handle of a started loop.
pub struct AcquisitionHandle {
    control: Arc<Control>,
    thread: Option<JoinHandle<Result<AcquisitionSummary, AcquisitionError>>>,
}

impl AcquisitionHandle {
    pub fn status(&self) -> AcquisitionStatus {
        AcquisitionStatus {
            control: self.control.clone(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.status().state()
    }

    /// Running -> Stopping. The current tick is finished, never interrupted.
    pub fn stop(&self) {
        let switched = self.control.state.compare_exchange(
            LoopState::Running as u8,
            LoopState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if switched.is_ok() {
            if let Some(thread) = &self.thread {
                thread.thread().unpark();
            }
        }
    }

    /// Waits for the thread; the device has been released when this returns.
    pub fn join(mut self) -> Result<AcquisitionSummary, AcquisitionError> {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or(Err(AcquisitionError::Panicked)),
            None => Err(AcquisitionError::Panicked),
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop();
            thread.thread().unpark();
            thread.join().ok();
        }
    }
}
