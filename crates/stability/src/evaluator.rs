//! Wait-for-stable loop

use crate::window::{StabilityWindow, WindowStats};
use ezo_protocol::clock::{self, Deadline};
use ezo_protocol::{EzoClient, EzoError};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

/// Anything that produces conductivity readings in thousandths of µS/cm
pub trait SampleSource {
    /// Error a reading can fail with
    type Error;

    /// Take one reading
    fn sample(&mut self) -> impl Future<Output = Result<u32, Self::Error>> + Send;
}

impl<W: AsyncWrite + Unpin + Send> SampleSource for EzoClient<W> {
    type Error = EzoError;

    async fn sample(&mut self) -> Result<u32, EzoError> {
        self.measure().await
    }
}

/// Errors ending a stabilization wait
#[derive(Debug, Error)]
pub enum StabilityError<E> {
    /// Budget spent without the readings settling
    #[error("Readings did not settle within {elapsed_ms}ms (last variance {variance:?})")]
    Timeout {
        /// Time spent sampling
        elapsed_ms: u64,
        /// Variance of the last full window, if one was ever collected
        variance: Option<f64>,
    },

    /// A reading failed
    #[error("Sampling failed: {0}")]
    Sample(E),
}

impl<E> StabilityError<E> {
    /// Check if the wait ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, StabilityError::Timeout { .. })
    }
}

impl StabilityError<EzoError> {
    /// Negative status code reported by the command surface
    pub fn code(&self) -> i32 {
        match self {
            StabilityError::Timeout { .. } => -110,
            StabilityError::Sample(e) => e.code(),
        }
    }
}

/// Sample `source` until a full window of readings has a population
/// variance below `tolerance²` (µS/cm), or `timeout` elapses.
///
/// The deadline is checked before every reading; a reading already in
/// progress is allowed to finish. Reading errors end the wait immediately.
pub async fn wait_for_stable<S: SampleSource>(
    source: &mut S,
    timeout: Duration,
    tolerance: f64,
) -> Result<WindowStats, StabilityError<S::Error>> {
    let deadline = Deadline::after(timeout);
    let mut window = StabilityWindow::new();
    let mut last_variance = None;

    loop {
        if deadline.expired() {
            let elapsed_ms = deadline.elapsed().as_millis() as u64;
            warn!(
                "Readings did not settle within {}ms (variance {:?}, tolerance {})",
                elapsed_ms, last_variance, tolerance
            );
            return Err(StabilityError::Timeout {
                elapsed_ms,
                variance: last_variance,
            });
        }

        let reading = source.sample().await.map_err(StabilityError::Sample)?;
        window.push(reading);

        if window.is_full() {
            let stats = window.stats();
            debug!(
                "Stability window mean {:.3} variance {:.3} ({} readings)",
                stats.mean, stats.variance, stats.count
            );
            if stats.within(tolerance) {
                info!("Readings settled at {:.3} µS/cm", stats.mean);
                return Ok(stats);
            }
            last_variance = Some(stats.variance);
        }

        clock::pause().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WINDOW_SIZE;
    use ezo_protocol::sim::SimProbe;

    /// Readings from a list, each taking a fixed time
    struct Scripted {
        values: Vec<u32>,
        taken: usize,
        latency: Duration,
    }

    impl Scripted {
        fn new(values: Vec<u32>, latency_ms: u64) -> Self {
            Self {
                values,
                taken: 0,
                latency: Duration::from_millis(latency_ms),
            }
        }
    }

    impl SampleSource for Scripted {
        type Error = &'static str;

        async fn sample(&mut self) -> Result<u32, &'static str> {
            tokio::time::sleep(self.latency).await;
            let value = self.values.get(self.taken).copied().ok_or("script exhausted")?;
            self.taken += 1;
            Ok(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_values_settle_on_window_fill() {
        let mut source = Scripted::new(vec![1_413_000; 40], 100);
        let stats = wait_for_stable(&mut source, Duration::from_secs(10), 1.0)
            .await
            .unwrap();

        assert_eq!(source.taken, WINDOW_SIZE);
        assert_eq!(stats.mean, 1413.0);
        assert_eq!(stats.variance, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_increasing_values_time_out() {
        let values = (0..1000).map(|i| i * 5_000).collect();
        let mut source = Scripted::new(values, 100);
        let err = wait_for_stable(&mut source, Duration::from_secs(3), 1.0)
            .await
            .unwrap_err();

        match err {
            StabilityError::Timeout {
                elapsed_ms,
                variance,
            } => {
                assert!(elapsed_ms > 3000);
                assert!(variance.unwrap() > 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        // Sampling stopped at the deadline
        assert!(source.taken < 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_after_drift() {
        let mut values: Vec<u32> = (0..6).map(|i| 1_000_000 + i * 50_000).collect();
        values.extend(std::iter::repeat(1_400_000).take(30));
        let mut source = Scripted::new(values, 100);

        let stats = wait_for_stable(&mut source, Duration::from_secs(10), 1.0)
            .await
            .unwrap();
        assert_eq!(source.taken, 6 + WINDOW_SIZE);
        assert_eq!(stats.mean, 1400.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_error_propagates() {
        let mut source = Scripted::new(vec![1_000; 3], 10);
        let err = wait_for_stable(&mut source, Duration::from_secs(10), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, StabilityError::Sample("script exhausted")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transducer_as_source() {
        let (mut client, sim) = SimProbe::client();
        sim.set_readings(&["12880.00"]);

        let stats = wait_for_stable(&mut client, Duration::from_secs(10), 1000.0)
            .await
            .unwrap();
        assert_eq!(stats.mean, 12880.0);

        let measurements = sim.commands().iter().filter(|c| *c == "R").count();
        assert_eq!(measurements, WINDOW_SIZE);
    }
}
