//! Calibration / Configuration Store
//!
//! In-memory mirror of the module's non-volatile record: one calibration
//! blob and one K-value per probe plus a bitmask of valid calibrations.
//! The record is written back only when asked to.

mod probe;
mod record;
mod storage;

pub use probe::{ParseProbeError, Probe};
pub use record::{ConfigRecord, ConfigStore, MAGIC, RECORD_OFFSET, RECORD_SIZE};
pub use storage::{FileStorage, MemoryStorage, NvStorage, DEFAULT_CAPACITY};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backing medium could not be read or written
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Write did not complete
    #[error("Storage write failed: {0}")]
    WriteFailed(String),

    /// Access beyond the end of the medium
    #[error("Access of {len} bytes at offset {offset} exceeds {capacity} byte storage")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// Stored record is not ours; recovered on load
    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    /// Record could not be encoded
    #[error("Record encoding error: {0}")]
    Encoding(String),

    /// Only complete calibrations may be stored
    #[error("Calibration for probe {probe} has {lines} of {expected} lines")]
    IncompleteCalibration {
        probe: Probe,
        lines: usize,
        expected: usize,
    },
}

impl StorageError {
    /// Negative status code reported by the command surface
    pub fn code(&self) -> i32 {
        match self {
            StorageError::Io(_) => -5,
            StorageError::WriteFailed(_) => -5,
            StorageError::OutOfBounds { .. } => -34,
            StorageError::Corrupt(_) => -84,
            StorageError::Encoding(_) => -84,
            StorageError::IncompleteCalibration { .. } => -22,
        }
    }
}

impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}
