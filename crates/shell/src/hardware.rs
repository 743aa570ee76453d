//! Linux sysfs adapters for the module's auxiliary hardware

use config_store::Probe;
use control::{ProbeSelect, SensorError, TemperatureProbe};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// DS18B20-style thermometer behind the `w1_therm` driver.
///
/// Conversions are started for the whole bus through the bus master's
/// `therm_bulk_read` file; the result is read from the device's
/// `temperature` file in millidegrees.
#[derive(Debug, Clone)]
pub struct W1Thermometer {
    device: PathBuf,
    bus_master: Option<PathBuf>,
}

impl W1Thermometer {
    /// Thermometer at `device` (a `/sys/bus/w1/devices/28-*` directory)
    pub fn new(device: impl Into<PathBuf>, bus_master: Option<PathBuf>) -> Self {
        Self {
            device: device.into(),
            bus_master,
        }
    }
}

impl TemperatureProbe for W1Thermometer {
    fn trigger(&mut self) -> Result<(), SensorError> {
        if !self.device.is_dir() {
            return Err(SensorError::Unavailable(self.device.display().to_string()));
        }
        match &self.bus_master {
            Some(bulk_read) => {
                fs::write(bulk_read, "trigger\n")?;
                debug!("Triggered conversion via {}", bulk_read.display());
            }
            // Without bulk read every `temperature` read converts
            None => debug!("No bus master configured for {}", self.device.display()),
        }
        Ok(())
    }

    fn read(&mut self) -> Result<i32, SensorError> {
        let raw = fs::read_to_string(self.device.join("temperature"))?;
        let millidegrees: i32 = raw
            .trim()
            .parse()
            .map_err(|_| SensorError::Malformed(raw.trim().to_string()))?;
        Ok(millidegrees / 10)
    }
}

/// Probe selector on a sysfs GPIO `value` file (low = A, high = B)
#[derive(Debug, Clone)]
pub struct SysfsProbeSelect {
    value: PathBuf,
}

impl SysfsProbeSelect {
    pub fn new(value: impl Into<PathBuf>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl ProbeSelect for SysfsProbeSelect {
    fn select(&mut self, probe: Probe) -> Result<(), SensorError> {
        let level = match probe {
            Probe::A => "0",
            Probe::B => "1",
        };
        fs::write(&self.value, level)?;
        Ok(())
    }
}
