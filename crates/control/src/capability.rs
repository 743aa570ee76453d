//! Hardware capabilities the module drives but does not implement

use crate::SensorError;
use config_store::Probe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// One temperature probe
pub trait TemperatureProbe {
    /// Start a conversion
    fn trigger(&mut self) -> Result<(), SensorError>;

    /// Result of the last conversion, in hundredths of °C
    fn read(&mut self) -> Result<i32, SensorError>;
}

/// Output selecting which conductivity probe is wired to the transducer
pub trait ProbeSelect {
    fn select(&mut self, probe: Probe) -> Result<(), SensorError>;
}

/// Thermometer returning a fixed value
#[derive(Debug, Clone)]
pub struct SimThermometer {
    centi_celsius: i32,
    triggered: bool,
    available: bool,
}

impl SimThermometer {
    /// Thermometer that always reads `centi_celsius`
    pub fn new(centi_celsius: i32) -> Self {
        Self {
            centi_celsius,
            triggered: false,
            available: true,
        }
    }

    /// Thermometer whose every operation fails
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(0)
        }
    }
}

impl TemperatureProbe for SimThermometer {
    fn trigger(&mut self) -> Result<(), SensorError> {
        if !self.available {
            return Err(SensorError::Unavailable("simulated thermometer".to_string()));
        }
        self.triggered = true;
        Ok(())
    }

    fn read(&mut self) -> Result<i32, SensorError> {
        if !self.available {
            return Err(SensorError::Unavailable("simulated thermometer".to_string()));
        }
        if !std::mem::take(&mut self.triggered) {
            return Err(SensorError::NotTriggered);
        }
        Ok(self.centi_celsius)
    }
}

/// Probe selector that only remembers its position
#[derive(Debug, Clone, Default)]
pub struct SimProbeSelect {
    /// 0 = nothing selected yet, else probe index + 1
    position: Arc<AtomicU8>,
}

impl SimProbeSelect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently selected probe
    pub fn selected(&self) -> Option<Probe> {
        match self.position.load(Ordering::Acquire) {
            1 => Some(Probe::A),
            2 => Some(Probe::B),
            _ => None,
        }
    }
}

impl ProbeSelect for SimProbeSelect {
    fn select(&mut self, probe: Probe) -> Result<(), SensorError> {
        self.position.store(probe.index() as u8 + 1, Ordering::Release);
        Ok(())
    }
}
