//! Provisioning Workflow
//!
//! Brings a fresh module into service: fixes the transducer's serial
//! settings, resets it, collects each probe's K-value and walks the
//! operator through dry, low and high calibration of both probes before
//! saving the result.

mod stage;
mod workflow;

pub use stage::{Stage, StepEvent, StepState};
pub use workflow::{provision, Operator, ProvisioningConfig};

use config_store::StorageError;
use control::ModuleError;
use ezo_protocol::EzoError;
use thiserror::Error;

/// Errors that end provisioning
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Ezo(#[from] EzoError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Operator input ended
    #[error("Operator input closed")]
    Operator,

    /// Transducer exported fewer lines than a calibration holds
    #[error("Calibration export returned {0} lines")]
    IncompleteExport(usize),
}

impl ProvisionError {
    /// Negative status code reported by the command surface
    pub fn code(&self) -> i32 {
        match self {
            ProvisionError::Ezo(e) => e.code(),
            ProvisionError::Module(e) => e.code(),
            ProvisionError::Storage(e) => e.code(),
            ProvisionError::Operator => -125,
            ProvisionError::IncompleteExport(_) => -61,
        }
    }
}
