//! Probe identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One of the two physical conductivity probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Probe {
    A,
    B,
}

impl Probe {
    /// Both probes in measurement order
    pub const ALL: [Probe; 2] = [Probe::A, Probe::B];

    /// Slot index in per-probe arrays
    pub fn index(self) -> usize {
        match self {
            Probe::A => 0,
            Probe::B => 1,
        }
    }

    /// Bit in the calibration-valid mask
    pub fn flag(self) -> u8 {
        1 << self.index()
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::A => write!(f, "A"),
            Probe::B => write!(f, "B"),
        }
    }
}

/// Unrecognized probe name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown probe {0:?} (expected A or B)")]
pub struct ParseProbeError(pub String);

impl FromStr for Probe {
    type Err = ParseProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" | "0" => Ok(Probe::A),
            "B" | "b" | "1" => Ok(Probe::B),
            other => Err(ParseProbeError(other.to_string())),
        }
    }
}
