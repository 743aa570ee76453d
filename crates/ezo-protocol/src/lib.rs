//! EZO Conductivity Protocol Implementation
//!
//! This crate provides serial communication with EZO-style electrical
//! conductivity transducers. Commands are ASCII lines terminated by a
//! carriage return; replies are lines of the same shape, with status and
//! lifecycle events prefixed by an asterisk.

mod calibration;
pub mod clock;
mod client;
mod command;
mod error;
pub mod fixed;
mod link;
pub mod sim;
mod status;
mod transport;

pub use calibration::{CalibrationBlob, LINE_COUNT, LINE_WIDTH};
pub use client::{DeviceInfo, EzoClient};
pub use command::Command;
pub use error::{CalibrationError, EzoError};
pub use link::{Connector, SerialConnector};
pub use status::StatusCode;
pub use transport::{spawn_receiver, LineTransport};

/// Longest command the transmit frame holds, excluding the terminator
pub const MAX_COMMAND_LEN: usize = 41;

/// Longest reply line the driver accepts, excluding the terminator
pub const RX_MAX_LINE_LEN: usize = 41;

/// Longest status line (`*DONE`)
pub const MAX_STATUS_LEN: usize = 5;

/// Decimal places carried by conductivity readings
pub const MEASUREMENT_PRECISION: u8 = 3;

/// Decimal places carried by K-values
pub const K_VALUE_PRECISION: u8 = 1;

/// Baud rate the transducer ships with
pub const FACTORY_BAUD_RATE: u32 = 9600;

/// Baud rate used during normal operation
pub const OPERATING_BAUD_RATE: u32 = 115200;

/// Reply deadlines per command class
pub mod timeouts {
    use std::time::Duration;

    /// Each trailing status line
    pub const STATUS: Duration = Duration::from_millis(2500);
    /// Device information query
    pub const IDENTIFY: Duration = Duration::from_millis(500);
    /// Single conductivity reading
    pub const MEASURE: Duration = Duration::from_millis(2000);
    /// Calibration point query
    pub const CALIBRATION_QUERY: Duration = Duration::from_millis(100);
    /// One calibration export line
    pub const EXPORT: Duration = Duration::from_millis(1000);
    /// Each reset / ready event
    pub const RESET: Duration = Duration::from_millis(2000);
    /// Each line of a raw passthrough reply
    pub const PASSTHROUGH: Duration = Duration::from_millis(1000);
}
