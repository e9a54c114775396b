// src/drivers/mod.rs
pub mod buffer;
pub mod device;
pub mod error;
pub mod picoscope;

pub use buffer::{Retention, SeriesSnapshot, SharedSeriesBuffer};
pub use device::{DeviceSession, SimulatedDevice};
pub use error::{AcquisitionError, BufferError, DeviceError, LogError, RenderError};
pub use picoscope::PicoScopeSession;
