//! EC Module Shell
//!
//! Host-side command surface for the conductivity module: settings,
//! logging, sysfs adapters for the temperature probes and probe selector,
//! and the operator commands.

mod commands;
mod hardware;
mod operator;
mod settings;

pub use commands::{render_measurement, CommandOutput, Shell, COMMANDS};
pub use hardware::{SysfsProbeSelect, W1Thermometer};
pub use operator::StdinOperator;
pub use settings::{Settings, SettingsError, SIM_DEVICE};

use std::str::FromStr;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging at the given level name (`info` if unrecognized)
pub fn init_logging(level: &str) -> Result<(), SetGlobalDefaultError> {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
