// src/render.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::drivers::{RenderError, SeriesSnapshot, SharedSeriesBuffer};
use crate::engine::AcquisitionStatus;

/// Failed ticks in a row before the render loop gives up.
pub const MAX_CONSECUTIVE_RENDER_FAILURES: u32 = 3;

/// Whatever shows the data: a window, a test recorder, ...
pub trait DisplaySink: Send {
    fn present(&mut self, snapshot: SeriesSnapshot) -> Result<(), RenderError>;
}

/// Fixed-cadence reader of the shared buffer.
pub struct RenderLoop<S: DisplaySink> {
    buffer: SharedSeriesBuffer,
    sink: S,
    tick: Duration,
    source: Option<AcquisitionStatus>,
}

impl<S: DisplaySink + 'static> RenderLoop<S> {
    pub fn new(buffer: SharedSeriesBuffer, sink: S, tick: Duration) -> Self {
        Self {
            buffer,
            sink,
            tick,
            source: None,
        }
    }

    /// Treat a halted acquisition loop as a failed tick.
    pub fn watch(mut self, source: AcquisitionStatus) -> Self {
        self.source = Some(source);
        self
    }

    pub fn start(self) -> std::io::Result<RenderHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let thread = thread::Builder::new()
            .name("render".into())
            .spawn(move || self.run(&flag))?;
        Ok(RenderHandle {
            stop,
            thread: Some(thread),
        })
    }

    fn tick_once(&mut self) -> Result<(), RenderError> {
        // The latest state is shown even when the source has halted.
        let presented = self.sink.present(self.buffer.snapshot());
        if self.source.as_ref().is_some_and(|s| s.halted()) {
            return Err(RenderError::SourceHalted);
        }
        presented
    }

    fn run(mut self, stop: &AtomicBool) -> Result<(), RenderError> {
        let mut failures = 0u32;
        let mut next = Instant::now();
        while !stop.load(Ordering::Acquire) {
            match self.tick_once() {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_RENDER_FAILURES {
                        warn!("render loop stopping: {e}");
                        return Err(e);
                    }
                }
            }
            next += self.tick;
            let now = Instant::now();
            if next > now {
                thread::park_timeout(next - now);
            } else {
                // Fell behind; do not try to catch up with a burst.
                next = now;
            }
        }
        info!("render loop stopped");
        Ok(())
    }
}

pub struct RenderHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), RenderError>>>,
}

impl RenderHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Ok after a requested stop, the last error if the loop gave up by itself.
    pub fn join(mut self) -> Result<(), RenderError> {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or(Err(RenderError::Panicked)),
            None => Ok(()),
        }
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}
