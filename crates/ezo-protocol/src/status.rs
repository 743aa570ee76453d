//! Asynchronous Status Codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Asterisk-prefixed status or lifecycle event emitted by the transducer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Command accepted (`*OK`)
    Ok,
    /// Command rejected (`*ER`)
    Error,
    /// Supply over voltage (`*OV`)
    OverVolt,
    /// Supply under voltage (`*UV`)
    UnderVolt,
    /// Device restarting (`*RS`)
    Reset,
    /// Device finished booting (`*RE`)
    Ready,
    /// Device entering sleep (`*SL`)
    Sleep,
    /// Device woke up (`*WA`)
    Wake,
    /// Calibration export finished (`*DONE`)
    Done,
    /// Anything else
    Unknown,
}

impl StatusCode {
    /// Classify a received line
    pub fn parse(line: &str) -> Self {
        match line {
            "*OK" => StatusCode::Ok,
            "*ER" => StatusCode::Error,
            "*OV" => StatusCode::OverVolt,
            "*UV" => StatusCode::UnderVolt,
            "*RS" => StatusCode::Reset,
            "*RE" => StatusCode::Ready,
            "*SL" => StatusCode::Sleep,
            "*WA" => StatusCode::Wake,
            "*DONE" => StatusCode::Done,
            _ => StatusCode::Unknown,
        }
    }

    /// Informational events that do not complete a command
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StatusCode::OverVolt
                | StatusCode::UnderVolt
                | StatusCode::Reset
                | StatusCode::Ready
                | StatusCode::Sleep
                | StatusCode::Wake
        )
    }

    /// Wire form of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "*OK",
            StatusCode::Error => "*ER",
            StatusCode::OverVolt => "*OV",
            StatusCode::UnderVolt => "*UV",
            StatusCode::Reset => "*RS",
            StatusCode::Ready => "*RE",
            StatusCode::Sleep => "*SL",
            StatusCode::Wake => "*WA",
            StatusCode::Done => "*DONE",
            StatusCode::Unknown => "*?",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
