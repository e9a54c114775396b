use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::drivers::DeviceError;
use crate::types::Channel;

/// Exclusive handle on an acquisition unit.
///
/// A session is opened by its constructor with the channel set already
/// configured; `acquire_one` blocks until the unit has produced one reading.
pub trait DeviceSession: Send {
    fn channels(&self) -> &[Channel];
    /// One blocking reading for `channel`, in millivolts.
    fn acquire_one(&mut self, channel: Channel) -> Result<f64, DeviceError>;
    /// Releases the unit. Must not be called twice.
    fn close(&mut self) -> Result<(), DeviceError>;
}

impl<D: DeviceSession + ?Sized> DeviceSession for Box<D> {
    fn channels(&self) -> &[Channel] {
        (**self).channels()
    }
    fn acquire_one(&mut self, channel: Channel) -> Result<f64, DeviceError> {
        (**self).acquire_one(channel)
    }
    fn close(&mut self) -> Result<(), DeviceError> {
        (**self).close()
    }
}

/// Software stand-in for the scope: a slow sine per channel plus noise.
pub struct SimulatedDevice {
    channels: Vec<Channel>,
    phase: f64,
    window: Duration,
}

impl SimulatedDevice {
    pub fn open(channels: Vec<Channel>) -> Self {
        Self {
            channels,
            phase: 0.0,
            // Matches the 250 µs streaming window of the real unit.
            window: Duration::from_micros(250),
        }
    }
}

impl SimulatedDevice {
    /// The one unit simulation mode always "finds".
    pub fn enumerate() -> Vec<String> {
        vec!["Simulated PicoScope 2000A (channels A-D)".to_owned()]
    }
}

impl DeviceSession for SimulatedDevice {
    fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn acquire_one(&mut self, channel: Channel) -> Result<f64, DeviceError> {
        if !self.channels.contains(&channel) {
            return Err(DeviceError::ChannelNotConfigured(channel));
        }
        thread::sleep(self.window);
        self.phase += 0.05;
        let idx = channel.index() as f64;
        let noise: f64 = rand::thread_rng().gen_range(-15.0..15.0);
        Ok((self.phase * (idx * 0.3 + 1.0)).sin() * 500.0 + idx * 200.0 + noise)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Deterministic device for loop tests: per-channel queues of results.
    /// An exhausted queue keeps returning `fallback`.
    pub struct ScriptedDevice {
        channels: Vec<Channel>,
        script: HashMap<Channel, VecDeque<Result<f64, ()>>>,
        fallback: Result<f64, ()>,
        pub closed: Arc<AtomicBool>,
    }

    impl ScriptedDevice {
        pub fn new(channels: Vec<Channel>, fallback: Result<f64, ()>) -> Self {
            Self {
                channels,
                script: HashMap::new(),
                fallback,
                closed: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn script(mut self, channel: Channel, results: Vec<Result<f64, ()>>) -> Self {
            self.script.insert(channel, results.into_iter().collect());
            self
        }
    }

    impl DeviceSession for ScriptedDevice {
        fn channels(&self) -> &[Channel] {
            &self.channels
        }

        fn acquire_one(&mut self, channel: Channel) -> Result<f64, DeviceError> {
            let next = self
                .script
                .get_mut(&channel)
                .and_then(|q| q.pop_front())
                .unwrap_or(self.fallback);
            next.map_err(|_| DeviceError::AcquireFailed {
                channel,
                step: "scripted",
                status: 1,
            })
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
