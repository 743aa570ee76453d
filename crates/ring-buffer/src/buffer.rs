//! Byte Ring Buffer Implementation

use crate::DEFAULT_CAPACITY;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Storage behind the lock
struct Ring {
    /// Pre-allocated storage
    storage: Box<[u8]>,
    /// Read position (oldest unread byte)
    start: usize,
    /// Number of unread bytes
    avail: usize,
}

impl Ring {
    fn push(&mut self, byte: u8) -> bool {
        let capacity = self.storage.len();
        let end = (self.start + self.avail) % capacity;
        self.storage[end] = byte;

        if self.avail == capacity {
            // Full: the slot we just wrote was the oldest byte
            self.start = (self.start + 1) % capacity;
            true
        } else {
            self.avail += 1;
            false
        }
    }

    fn pop(&mut self) -> Option<u8> {
        if self.avail == 0 {
            return None;
        }
        let byte = self.storage[self.start];
        self.start = (self.start + 1) % self.storage.len();
        self.avail -= 1;
        Some(byte)
    }

    fn peek(&self) -> Option<u8> {
        (self.avail > 0).then(|| self.storage[self.start])
    }
}

/// Overwrite-oldest byte queue for received serial data.
///
/// Writes never block on a full queue: the oldest unread byte is dropped
/// instead, so the receive path can never stall.
pub struct LineBuffer {
    ring: Mutex<Ring>,
    /// Bytes lost to overwrites (for diagnostics)
    overwritten: AtomicUsize,
}

impl LineBuffer {
    /// Create a new buffer with the given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                storage: vec![0u8; capacity].into_boxed_slice(),
                start: 0,
                avail: 0,
            }),
            overwritten: AtomicUsize::new(0),
        }
    }

    /// Create a buffer with the default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // A panicking holder cannot leave the ring inconsistent
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one received byte (overwrites oldest if full)
    pub fn push(&self, byte: u8) {
        if self.lock().push(byte) {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Append a chunk of received bytes
    pub fn extend(&self, bytes: &[u8]) {
        let mut ring = self.lock();
        let mut lost = 0;
        for &byte in bytes {
            if ring.push(byte) {
                lost += 1;
            }
        }
        drop(ring);

        if lost > 0 {
            trace!("Line buffer overwrote {} unread bytes", lost);
            self.overwritten.fetch_add(lost, Ordering::Relaxed);
        }
    }

    /// Take the oldest unread byte
    pub fn pop(&self) -> Option<u8> {
        self.lock().pop()
    }

    /// Look at the oldest unread byte without consuming it
    pub fn peek(&self) -> Option<u8> {
        self.lock().peek()
    }

    /// Discard buffered bytes up to (not including) the next `marker`.
    ///
    /// Returns the number of bytes discarded. If no marker is buffered the
    /// queue ends up empty.
    pub fn skip_until(&self, marker: u8) -> usize {
        let mut ring = self.lock();
        let mut skipped = 0;
        while let Some(byte) = ring.peek() {
            if byte == marker {
                break;
            }
            ring.pop();
            skipped += 1;
        }
        skipped
    }

    /// Drop every unread byte
    pub fn clear(&self) {
        let mut ring = self.lock();
        ring.start = 0;
        ring.avail = 0;
    }

    /// Number of unread bytes
    pub fn len(&self) -> usize {
        self.lock().avail
    }

    /// Check if there is nothing to read
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.lock().storage.len()
    }

    /// Total bytes lost to overwrites since creation
    pub fn overwritten(&self) -> usize {
        self.overwritten.load(Ordering::Relaxed)
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("overwritten", &self.overwritten())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(buffer: &LineBuffer) -> Vec<u8> {
        std::iter::from_fn(|| buffer.pop()).collect()
    }

    #[test]
    fn test_push_and_pop_in_order() {
        let buffer = LineBuffer::new(8);
        buffer.extend(b"*OK\r");

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.peek(), Some(b'*'));
        assert_eq!(drain(&buffer), b"*OK\r");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overwrite_oldest() {
        let buffer = LineBuffer::new(4);
        buffer.extend(b"abcdef");

        // Only the newest `capacity` bytes survive
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.overwritten(), 2);
        assert_eq!(drain(&buffer), b"cdef");
    }

    #[test]
    fn test_skip_until_marker() {
        let buffer = LineBuffer::new(16);
        buffer.extend(b"12.3\r*OK\r");

        assert_eq!(buffer.skip_until(b'*'), 5);
        assert_eq!(drain(&buffer), b"*OK\r");
    }

    #[test]
    fn test_skip_without_marker_empties() {
        let buffer = LineBuffer::new(16);
        buffer.extend(b"noise");

        assert_eq!(buffer.skip_until(b'*'), 5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear() {
        let buffer = LineBuffer::new(16);
        buffer.extend(b"stale reply\r");
        buffer.clear();

        assert!(buffer.is_empty());
        buffer.push(b'x');
        assert_eq!(drain(&buffer), b"x");
    }

    proptest! {
        #[test]
        fn prop_keeps_newest_bytes(data in proptest::collection::vec(any::<u8>(), 0..64), capacity in 1usize..32) {
            let buffer = LineBuffer::new(capacity);
            buffer.extend(&data);

            let keep = data.len().min(capacity);
            prop_assert_eq!(drain(&buffer), data[data.len() - keep..].to_vec());
            prop_assert_eq!(buffer.overwritten(), data.len() - keep);
        }
    }
}
