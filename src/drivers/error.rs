use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::Channel;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device library unavailable: {0}")]
    LibraryUnavailable(String),
    #[error("failed to open device: {0}")]
    OpenFailed(String),
    #[error("{channel}: {step} failed (status {status:#x})")]
    AcquireFailed {
        channel: Channel,
        step: &'static str,
        status: u32,
    },
    #[error("{channel}: device not ready after {waited:?}")]
    Timeout { channel: Channel, waited: Duration },
    #[error("failed to close device: {0}")]
    CloseFailed(String),
    #[error("{0} is not enabled on this session")]
    ChannelNotConfigured(Channel),
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("device unresponsive: {consecutive} consecutive sample sets failed on every channel")]
    DeviceUnresponsive { consecutive: u32 },
    #[error("acquisition thread panicked")]
    Panicked,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("record I/O failed on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LogError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LogError::IoFailure {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("acquisition loop has halted")]
    SourceHalted,
    #[error("display is closed")]
    DisplayClosed,
    #[error("render thread panicked")]
    Panicked,
}
