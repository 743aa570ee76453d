//! Stabilization Evaluator
//!
//! Decides when a stream of conductivity readings has settled: the
//! population variance over the last [`WINDOW_SIZE`] readings must drop
//! below the square of a tolerance before the time budget runs out.

mod evaluator;
mod window;

pub use evaluator::{wait_for_stable, SampleSource, StabilityError};
pub use window::{StabilityWindow, WindowStats, WINDOW_SIZE};
