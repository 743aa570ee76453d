//! Poll-with-deadline timing
//!
//! Every blocking wait in the driver polls the receive buffer and checks a
//! wall-clock deadline here. Time comes from `tokio::time`, so paused test
//! runtimes advance it deterministically.

use std::time::Duration;
use tokio::time::Instant;

/// Pause between polls of an empty receive buffer
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A wall-clock budget started at creation
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a budget now
    pub fn after(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// True once more than the budget has elapsed
    pub fn expired(&self) -> bool {
        self.start.elapsed() > self.budget
    }

    /// Time spent since creation
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Budget in milliseconds (for error reporting)
    pub fn budget_ms(&self) -> u64 {
        self.budget.as_millis() as u64
    }
}

/// Yield for one poll interval
pub async fn pause() {
    tokio::time::sleep(POLL_INTERVAL).await;
}

/// Sleep for an arbitrary duration
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}
