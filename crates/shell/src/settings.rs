//! Host settings
//!
//! Read from an optional `ec-module.toml` (or an explicit file) and then
//! from `EC_MODULE_*` environment variables; anything unset keeps its
//! default.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `serial_device` value selecting the simulated transducer
pub const SIM_DEVICE: &str = "sim";

/// Settings errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Host configuration of the module
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Serial device of the transducer, or `sim`
    pub serial_device: String,
    /// Operating baud rate
    pub baud_rate: u32,
    /// Baud rate of a transducer on factory settings
    pub factory_baud_rate: u32,
    /// EEPROM image file
    pub storage_path: PathBuf,
    /// 1-Wire device directory of probe A's thermometer
    pub temperature_a: Option<PathBuf>,
    /// 1-Wire device directory of probe B's thermometer
    pub temperature_b: Option<PathBuf>,
    /// Bus master `therm_bulk_read` file
    pub w1_bus_master: Option<PathBuf>,
    /// GPIO value file driving the probe selector
    pub probe_select_gpio: Option<PathBuf>,
    /// Log level name
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial_device: "/dev/ttyUSB0".to_string(),
            baud_rate: ezo_protocol::OPERATING_BAUD_RATE,
            factory_baud_rate: ezo_protocol::FACTORY_BAUD_RATE,
            storage_path: PathBuf::from("ec-module.eeprom"),
            temperature_a: None,
            temperature_b: None,
            w1_bus_master: None,
            probe_select_gpio: None,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `file` (required) or `ec-module.toml` (optional),
    /// then the environment
    pub fn load(file: Option<&Path>) -> Result<Self, SettingsError> {
        let builder = Config::builder();
        let builder = match file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("ec-module").required(false)),
        };

        let settings = builder
            .add_source(
                Environment::with_prefix("EC_MODULE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Check if the simulated transducer was selected
    pub fn is_simulated(&self) -> bool {
        self.serial_device == SIM_DEVICE
    }
}
