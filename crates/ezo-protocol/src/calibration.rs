//! Calibration Blob
//!
//! The transducer exports its calibration curve as a fixed number of
//! fixed-width text lines. The blob is opaque to this firmware.

use crate::error::CalibrationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters per exported line
pub const LINE_WIDTH: usize = 12;

/// Lines per exported calibration
pub const LINE_COUNT: usize = 10;

/// One probe's exported calibration, NUL-padded per line.
///
/// A blob is either empty (never exported) or complete (every line
/// populated). The serialized form is exactly `LINE_COUNT * LINE_WIDTH`
/// bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalibrationBlob {
    lines: [[u8; LINE_WIDTH]; LINE_COUNT],
}

impl CalibrationBlob {
    /// A blob with no lines
    pub const fn empty() -> Self {
        Self {
            lines: [[0; LINE_WIDTH]; LINE_COUNT],
        }
    }

    /// Build a complete blob from exactly `LINE_COUNT` lines
    pub fn from_lines<'a, I>(lines: I) -> Result<Self, CalibrationError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut blob = Self::empty();
        let mut count = 0;
        for (index, line) in lines.into_iter().enumerate() {
            if index >= LINE_COUNT {
                count = index + 1;
                continue;
            }
            blob.set_line(index, line)?;
            count = index + 1;
        }

        if count != LINE_COUNT {
            return Err(CalibrationError::WrongLineCount(count, LINE_COUNT));
        }
        Ok(blob)
    }

    /// Store one line
    pub fn set_line(&mut self, index: usize, text: &str) -> Result<(), CalibrationError> {
        if index >= LINE_COUNT {
            return Err(CalibrationError::IndexOutOfRange(index));
        }
        let bytes = text.as_bytes();
        if bytes.is_empty() {
            return Err(CalibrationError::EmptyLine(index));
        }
        if bytes.len() > LINE_WIDTH {
            return Err(CalibrationError::LineTooLong {
                index,
                len: bytes.len(),
                max: LINE_WIDTH,
            });
        }
        if let Some(&byte) = bytes.iter().find(|b| !(0x20..=0x7E).contains(*b)) {
            return Err(CalibrationError::InvalidCharacter { index, byte });
        }

        let slot = &mut self.lines[index];
        *slot = [0; LINE_WIDTH];
        slot[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Text of one line (empty if unset or out of range)
    pub fn line(&self, index: usize) -> &str {
        match self.lines.get(index) {
            Some(raw) => {
                let len = raw.iter().position(|&b| b == 0).unwrap_or(LINE_WIDTH);
                std::str::from_utf8(&raw[..len]).unwrap_or_default()
            }
            None => "",
        }
    }

    /// All lines in order, including empty ones
    pub fn lines(&self) -> impl Iterator<Item = &str> + '_ {
        (0..LINE_COUNT).map(move |index| self.line(index))
    }

    /// Number of populated lines
    pub fn line_count(&self) -> usize {
        self.lines.iter().filter(|line| line[0] != 0).count()
    }

    /// Check if nothing was ever stored
    pub fn is_empty(&self) -> bool {
        self.line_count() == 0
    }

    /// Check if every line is populated
    pub fn is_complete(&self) -> bool {
        self.line_count() == LINE_COUNT
    }
}

impl Default for CalibrationBlob {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for CalibrationBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            f.write_str(line)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CalibrationBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.lines()).finish()
    }
}
