//! Serial Receive Ring Buffer
//!
//! Provides a fixed-capacity byte queue shared between the serial receive
//! path (producer) and the line reader (consumer).

mod buffer;

pub use buffer::LineBuffer;

/// Default capacity: three maximum-length reply lines
pub const DEFAULT_CAPACITY: usize = 42 * 3;
