//! Sample window statistics

use ezo_protocol::MEASUREMENT_PRECISION;

/// Number of readings judged together
pub const WINDOW_SIZE: usize = 12;

/// Mean and spread of the readings in a window, in µS/cm
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// Arithmetic mean
    pub mean: f64,
    /// Population variance
    pub variance: f64,
    /// Number of readings the figures cover
    pub count: usize,
}

impl WindowStats {
    /// Compute mean and population variance of a slice of values
    pub fn compute(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                variance: 0.0,
                count: 0,
            };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values
            .iter()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        Self {
            mean,
            variance,
            count: values.len(),
        }
    }

    /// True when the spread is strictly inside `tolerance`
    pub fn within(&self, tolerance: f64) -> bool {
        self.variance < tolerance * tolerance
    }
}

/// Circular window over the most recent readings
#[derive(Debug, Clone)]
pub struct StabilityWindow {
    slots: [f64; WINDOW_SIZE],
    next: usize,
    filled: usize,
}

impl Default for StabilityWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityWindow {
    /// Create an empty window
    pub fn new() -> Self {
        Self {
            slots: [0.0; WINDOW_SIZE],
            next: 0,
            filled: 0,
        }
    }

    /// Add a reading in thousandths of µS/cm, replacing the oldest once full.
    ///
    /// Readings are compared in whole µS/cm.
    pub fn push(&mut self, milli_units: u32) {
        self.slots[self.next] = f64::from(milli_units) / 10f64.powi(i32::from(MEASUREMENT_PRECISION));
        self.next = (self.next + 1) % WINDOW_SIZE;
        self.filled = (self.filled + 1).min(WINDOW_SIZE);
    }

    /// Number of readings held
    pub fn len(&self) -> usize {
        self.filled
    }

    /// Check if no reading has been added
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Check if the window holds a full set of readings
    pub fn is_full(&self) -> bool {
        self.filled == WINDOW_SIZE
    }

    /// Statistics over the readings currently held
    pub fn stats(&self) -> WindowStats {
        // Before the first wrap the valid readings are the leading slots
        WindowStats::compute(&self.slots[..self.filled])
    }

    /// Drop all readings
    pub fn clear(&mut self) {
        self.next = 0;
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_stats_known_values() {
        let stats = WindowStats::compute(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.variance, 4.0);
        assert_eq!(stats.count, 8);
        assert!(stats.within(2.5));
        assert!(!stats.within(2.0));
    }

    #[test]
    fn test_window_scales_to_whole_units() {
        let mut window = StabilityWindow::new();
        window.push(1_413_000);
        window.push(1_415_000);

        let stats = window.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 1414.0);
        assert_eq!(stats.variance, 1.0);
    }

    #[test]
    fn test_window_keeps_newest() {
        let mut window = StabilityWindow::new();
        for _ in 0..WINDOW_SIZE {
            window.push(100_000);
        }
        for _ in 0..WINDOW_SIZE {
            window.push(50_000);
        }

        assert!(window.is_full());
        let stats = window.stats();
        assert_eq!(stats.mean, 50.0);
        assert_eq!(stats.variance, 0.0);
    }

    #[test]
    fn test_clear() {
        let mut window = StabilityWindow::new();
        window.push(1);
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.stats().count, 0);
    }

    proptest! {
        #[test]
        fn prop_variance_non_negative(values in proptest::collection::vec(0u32..10_000_000, 1..40)) {
            let mut window = StabilityWindow::new();
            for v in &values {
                window.push(*v);
            }
            let stats = window.stats();
            prop_assert_eq!(stats.count, values.len().min(WINDOW_SIZE));
            prop_assert!(stats.variance >= 0.0);
        }
    }
}
