//! EZO Protocol Error Types

use thiserror::Error;

/// Errors that can occur while talking to the transducer
#[derive(Debug, Error)]
pub enum EzoError {
    /// Serial port connection error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No reply within the budget
    #[error("Timeout waiting for reply after {0}ms")]
    Timeout(u64),

    /// Reply line longer than the receive buffer allows
    #[error("Reply exceeds {0} byte line buffer")]
    BufferOverflow(usize),

    /// Command does not fit the transmit frame
    #[error("Command exceeds {0} byte transmit frame")]
    FormatTooLong(usize),

    /// The transducer answered `*ER`
    #[error("Command rejected by transducer: {0}")]
    Rejected(String),

    /// Unexpected status code or malformed reply
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The link was closed and has not been reopened
    #[error("Serial link is closed")]
    LinkClosed,

    /// Device identified as something other than a conductivity circuit
    #[error("Not a conductivity transducer: {0}")]
    NotConductivityDevice(String),
}

impl EzoError {
    /// Negative status code reported by the command surface
    pub fn code(&self) -> i32 {
        match self {
            EzoError::Rejected(_) => -1,
            EzoError::ProtocolError(_) => -2,
            EzoError::SerialError(_) => -5,
            EzoError::FormatTooLong(_) => -7,
            EzoError::NotConductivityDevice(_) => -19,
            EzoError::BufferOverflow(_) => -105,
            EzoError::LinkClosed => -107,
            EzoError::Timeout(_) => -110,
        }
    }

    /// Check if this is a reply timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, EzoError::Timeout(_))
    }
}

impl From<std::io::Error> for EzoError {
    fn from(err: std::io::Error) -> Self {
        EzoError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for EzoError {
    fn from(err: tokio_serial::Error) -> Self {
        EzoError::SerialError(err.to_string())
    }
}

/// Errors building a calibration blob
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalibrationError {
    /// Line index outside the blob
    #[error("Calibration line {0} is out of range")]
    IndexOutOfRange(usize),

    /// Line does not fit the fixed width
    #[error("Calibration line {index} is {len} bytes, max {max}")]
    LineTooLong { index: usize, len: usize, max: usize },

    /// Line carries no data
    #[error("Calibration line {0} is empty")]
    EmptyLine(usize),

    /// Line carries a non-printable byte
    #[error("Calibration line {index} contains byte {byte:#04x}")]
    InvalidCharacter { index: usize, byte: u8 },

    /// Wrong number of lines for a complete blob
    #[error("Calibration has {0} lines, expected {1}")]
    WrongLineCount(usize, usize),
}

impl From<CalibrationError> for EzoError {
    fn from(err: CalibrationError) -> Self {
        EzoError::ProtocolError(err.to_string())
    }
}
