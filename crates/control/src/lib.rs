//! Module Control
//!
//! Owns the transducer, the two temperature probes, the probe selector and
//! the configuration store, and serializes sensor work through a
//! single-slot request channel.

mod capability;
mod dispatcher;
mod sensor;

pub use capability::{ProbeSelect, SimProbeSelect, SimThermometer, TemperatureProbe};
pub use dispatcher::{
    ControlHandle, ControlLoop, InitOutcome, MeasurementOutcome, RequestError, Task, TaskStatus,
};
pub use sensor::{EcModule, MeasurementRecord, Step, StepFailure, CONDUCTIVITY_SETTLE};

use config_store::StorageError;
use ezo_protocol::EzoError;
use thiserror::Error;

/// Temperature probe and probe selector failures
#[derive(Debug, Error)]
pub enum SensorError {
    /// Device file could not be read or written
    #[error("Sensor I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Read without a preceding conversion
    #[error("Temperature read before conversion was triggered")]
    NotTriggered,

    /// Device returned something unparsable
    #[error("Malformed sensor value: {0}")]
    Malformed(String),

    /// Device not present
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),
}

impl SensorError {
    /// Negative status code reported by the command surface
    pub fn code(&self) -> i32 {
        match self {
            SensorError::Io(_) => -5,
            SensorError::NotTriggered => -11,
            SensorError::Malformed(_) => -74,
            SensorError::Unavailable(_) => -19,
        }
    }
}

/// Any failure of a module operation
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Ezo(#[from] EzoError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ModuleError {
    /// Negative status code reported by the command surface
    pub fn code(&self) -> i32 {
        match self {
            ModuleError::Ezo(e) => e.code(),
            ModuleError::Sensor(e) => e.code(),
            ModuleError::Storage(e) => e.code(),
        }
    }
}
