// src/types.rs
use chrono::{DateTime, Local};
use std::fmt;
use std::str::FromStr;

// 测量通道 (与硬件通道索引一一对应)
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Channel {
    A,
    B,
    C,
    D,
}

impl Channel {
    /// Hardware channel index used by the driver.
    pub fn index(self) -> i32 {
        match self {
            Channel::A => 0,
            Channel::B => 1,
            Channel::C => 2,
            Channel::D => 3,
        }
    }

    pub fn letter(self) -> &'static str {
        match self {
            Channel::A => "A",
            Channel::B => "B",
            Channel::C => "C",
            Channel::D => "D",
        }
    }

    /// Column name used in record file headers.
    pub fn column_name(self) -> String {
        format!("Channel_{}", self.letter())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel {}", self.letter())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Channel::A),
            "B" => Ok(Channel::B),
            "C" => Ok(Channel::C),
            "D" => Ok(Channel::D),
            other => Err(format!("unknown channel '{other}'")),
        }
    }
}

/// One reading for one channel, in millivolts.
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Sample {
    Millivolts(f64),
    Missing,
}

impl Sample {
    pub fn value(self) -> Option<f64> {
        match self {
            Sample::Millivolts(v) => Some(v),
            Sample::Missing => None,
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, Sample::Missing)
    }
}

/// One reading per configured channel, captured in the same tick.
#[derive(Clone, Debug)]
pub struct SampleSet {
    pub captured_at: DateTime<Local>,
    pub samples: Vec<Sample>, // configured channel order
}

impl SampleSet {
    pub fn new(captured_at: DateTime<Local>, samples: Vec<Sample>) -> Self {
        Self {
            captured_at,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn all_missing(&self) -> bool {
        self.samples.iter().all(|s| s.is_missing())
    }
}

// 连接模式
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum ConnectionMode {
    Simulation,
    Hardware,
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulation" | "sim" => Ok(ConnectionMode::Simulation),
            "hardware" | "real" => Ok(ConnectionMode::Hardware),
            other => Err(format!("unknown connection mode '{other}'")),
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Simulation => f.write_str("simulation"),
            ConnectionMode::Hardware => f.write_str("hardware"),
        }
    }
}

// 后台采集线程发给 GUI / 操作日志的消息
#[derive(Clone, Debug)]
pub enum EngineEvent {
    Started { channels: Vec<Channel> },
    Stopped { sample_sets: u64 },
    ChannelFailed { channel: Channel, reason: String },
    DeviceUnresponsive { consecutive: u32 },
    LogFailed(String),
}

impl EngineEvent {
    /// Text routed to the action log.
    pub fn describe(&self) -> String {
        match self {
            EngineEvent::Started { channels } => {
                let names: Vec<&str> = channels.iter().map(|c| c.letter()).collect();
                format!("Acquisition started on channels {}", names.join(", "))
            }
            EngineEvent::Stopped { sample_sets } => {
                format!("Acquisition stopped after {sample_sets} sample sets")
            }
            EngineEvent::ChannelFailed { channel, reason } => {
                format!("{channel} read failed: {reason}")
            }
            EngineEvent::DeviceUnresponsive { consecutive } => format!(
                "Device unresponsive ({consecutive} consecutive failed sample sets), acquisition halted"
            ),
            EngineEvent::LogFailed(reason) => format!("Record write failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_parsing_is_case_insensitive() {
        assert_eq!(" b ".parse::<Channel>().unwrap(), Channel::B);
        assert!("E".parse::<Channel>().is_err());
        assert_eq!(Channel::C.column_name(), "Channel_C");
    }

    #[test]
    fn all_missing_requires_every_channel() {
        let now = Local::now();
        let partial = SampleSet::new(now, vec![Sample::Missing, Sample::Millivolts(1.0)]);
        let full = SampleSet::new(now, vec![Sample::Missing, Sample::Missing]);
        assert!(!partial.all_missing());
        assert!(full.all_missing());
    }
}
