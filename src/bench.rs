// src/bench.rs
use std::sync::mpsc::Sender;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::config::BenchConfig;
use crate::drivers::{
    AcquisitionError, DeviceSession, PicoScopeSession, SharedSeriesBuffer, SimulatedDevice,
};
use crate::engine::{
    AcquisitionHandle, AcquisitionLoop, AcquisitionStatus, AcquisitionSummary, LoopState,
};
use crate::recorder::{LogRotator, RecordSink};
use crate::render::{DisplaySink, RenderHandle, RenderLoop};
use crate::types::{ConnectionMode, EngineEvent};

pub fn open_device(config: &BenchConfig) -> Result<Box<dyn DeviceSession>> {
    match config.connection {
        ConnectionMode::Simulation => Ok(Box::new(SimulatedDevice::open(config.channels.clone()))),
        ConnectionMode::Hardware => {
            let session = PicoScopeSession::open(config.channels.clone(), config.poll_timeout)
                .context("opening PicoScope")?;
            Ok(Box::new(session))
        }
    }
}

/// Human-readable list of units reachable in `mode`.
pub fn list_devices(mode: ConnectionMode) -> Result<Vec<String>> {
    match mode {
        ConnectionMode::Simulation => Ok(SimulatedDevice::enumerate()),
        ConnectionMode::Hardware => {
            let serials = PicoScopeSession::enumerate().context("enumerating PicoScope units")?;
            Ok(serials
                .into_iter()
                .map(|serial| format!("PicoScope 2000A with serial {serial}"))
                .collect())
        }
    }
}

/// One acquisition session: device, buffer, both loops.
pub struct Bench {
    buffer: SharedSeriesBuffer,
    acquisition: Option<AcquisitionHandle>,
    render: Option<RenderHandle>,
}

impl Bench {
    /// Takes an already opened device and starts acquisition and rendering.
    /// Opening failures surface from `open_device`, before this is called.
    pub fn start<S: DisplaySink + 'static>(
        config: &BenchConfig,
        device: Box<dyn DeviceSession>,
        display: S,
        events: Sender<EngineEvent>,
    ) -> Result<Self> {
        let buffer = SharedSeriesBuffer::new(config.channels.clone(), config.retention);
        let sink: Option<Box<dyn RecordSink>> = if config.logging_enabled {
            Some(Box::new(LogRotator::new(
                &config.log_path,
                config.channels.clone(),
                config.file_size_limit_mb,
            )))
        } else {
            None
        };
        let acquisition = AcquisitionLoop::new(device, buffer.clone(), sink, config.log_interval, events);
        let status = acquisition.status();
        let acquisition = acquisition
            .start()
            .context("spawning acquisition thread")?;
        let render = RenderLoop::new(buffer.clone(), display, config.render_tick)
            .watch(status)
            .start()
            .context("spawning render thread")?;
        info!(
            "bench started ({}, logging {})",
            config.connection,
            if config.logging_enabled { "on" } else { "off" }
        );
        Ok(Self {
            buffer,
            acquisition: Some(acquisition),
            render: Some(render),
        })
    }

    pub fn buffer(&self) -> &SharedSeriesBuffer {
        &self.buffer
    }

    /// False once the render loop has stopped, by request or after repeated failures.
    pub fn rendering(&self) -> bool {
        self.render.as_ref().is_some_and(|r| !r.is_finished())
    }

    pub fn state(&self) -> LoopState {
        self.acquisition
            .as_ref()
            .map_or(LoopState::Stopped, |a| a.state())
    }

    pub fn status(&self) -> Option<AcquisitionStatus> {
        self.acquisition.as_ref().map(|a| a.status())
    }

    /// Stops rendering first, then acquisition; the device is released once
    /// the acquisition thread has been joined. Safe to call more than once.
    pub fn shutdown(&mut self) -> Option<Result<AcquisitionSummary, AcquisitionError>> {
        if let Some(render) = self.render.take() {
            render.stop();
            if let Err(e) = render.join() {
                warn!("render loop ended with: {e}");
            }
        }
        let acquisition = self.acquisition.take()?;
        acquisition.stop();
        Some(acquisition.join())
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::device::scripted::ScriptedDevice;
    use crate::drivers::{RenderError, SeriesSnapshot};
    use crate::types::Channel;
    use std::sync::atomic::Ordering;
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct LastFrame(Arc<Mutex<Option<SeriesSnapshot>>>);

    impl DisplaySink for LastFrame {
        fn present(&mut self, snapshot: SeriesSnapshot) -> Result<(), RenderError> {
            *self.0.lock().unwrap() = Some(snapshot);
            Ok(())
        }
    }

    fn config(root: &std::path::Path) -> BenchConfig {
        BenchConfig {
            log_path: root.to_path_buf(),
            log_interval: Duration::from_millis(5),
            render_tick: Duration::from_millis(2),
            channels: vec![Channel::A, Channel::B],
            connection: ConnectionMode::Simulation,
            ..BenchConfig::default()
        }
    }

    #[test]
    fn session_feeds_display_and_records_then_shuts_down_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let device = ScriptedDevice::new(config.channels.clone(), Ok(3.0));
        let closed = device.closed.clone();
        let display = LastFrame::default();
        let (tx, rx) = channel();
        let mut bench = Bench::start(&config, Box::new(device), display.clone(), tx).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while display.0.lock().unwrap().as_ref().map_or(0, |s| s.len()) < 3 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
        let status = bench.status().unwrap();
        assert_eq!(status.state(), LoopState::Running);
        assert_eq!(bench.state(), LoopState::Running);
        assert!(bench.rendering());

        let summary = bench.shutdown().unwrap().unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(status.state(), LoopState::Stopped);
        assert_eq!(summary.sample_sets as usize, bench.buffer().len());
        assert!(bench.shutdown().is_none());
        assert!(!bench.rendering());
        assert_eq!(bench.state(), LoopState::Stopped);

        let record_files = std::fs::read_dir(tmp.path())
            .unwrap()
            .flat_map(|day| std::fs::read_dir(day.unwrap().path()).unwrap())
            .count();
        assert!(record_files >= 1);
        assert!(rx.try_iter().any(|e| matches!(e, EngineEvent::Stopped { .. })));
    }

    #[test]
    fn logging_disabled_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            logging_enabled: false,
            ..config(tmp.path())
        };
        let device = SimulatedDevice::open(config.channels.clone());
        let (tx, _rx) = channel();
        let mut bench = Bench::start(&config, Box::new(device), LastFrame::default(), tx).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while bench.buffer().len() < 2 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
        bench.shutdown().unwrap().unwrap();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn simulation_mode_opens_without_hardware() {
        let tmp = tempfile::tempdir().unwrap();
        let device = open_device(&config(tmp.path())).unwrap();
        assert_eq!(device.channels(), &[Channel::A, Channel::B]);
        let listed = list_devices(ConnectionMode::Simulation).unwrap();
        assert_eq!(listed, SimulatedDevice::enumerate());
    }
}
