//! Command Frame Construction

use crate::error::EzoError;
use crate::MAX_COMMAND_LEN;
use std::fmt;

/// Build a [`Command`] with `format!` syntax
#[macro_export]
macro_rules! command {
    ($($arg:tt)*) => {
        $crate::Command::new(format_args!($($arg)*))
    };
}

/// A formatted command, owned by the caller for the length of one round
/// trip. The buffer is sized to the transmit frame and holds one extra
/// byte for the carriage return.
#[derive(Clone, Copy)]
pub struct Command {
    buf: [u8; MAX_COMMAND_LEN + 1],
    len: usize,
}

impl Command {
    /// Format a command, failing if it would not fit the transmit frame
    pub fn new(args: fmt::Arguments<'_>) -> Result<Self, EzoError> {
        let mut command = Self {
            buf: [0; MAX_COMMAND_LEN + 1],
            len: 0,
        };
        fmt::write(&mut command, args).map_err(|_| EzoError::FormatTooLong(MAX_COMMAND_LEN))?;
        Ok(command)
    }

    /// Command from a fixed string
    pub fn literal(text: &str) -> Result<Self, EzoError> {
        Self::new(format_args!("{}", text))
    }

    /// Command text without terminator
    pub fn as_str(&self) -> &str {
        // Only whole `&str` pieces are ever appended
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    /// Bytes to put on the wire, including the carriage return
    pub fn frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.len + 1);
        frame.extend_from_slice(&self.buf[..self.len]);
        frame.push(b'\r');
        frame
    }

    /// Command length without terminator
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check for the bare wake-up command
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Write for Command {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > MAX_COMMAND_LEN {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({:?})", self.as_str())
    }
}
