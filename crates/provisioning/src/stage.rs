//! Calibration stage state machine
//!
//! Every stage runs AwaitConfirm -> Sampling -> Committing -> Done. A
//! sampling timeout goes back to AwaitConfirm so the operator can fix the
//! probe and try the same stage again.

use std::fmt;

/// Calibration point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dry,
    Low,
    High,
}

impl Stage {
    /// Stages in calibration order
    pub const ALL: [Stage; 3] = [Stage::Dry, Stage::Low, Stage::High];

    /// Whether the stage needs the solution's conductivity
    pub fn needs_solution(self) -> bool {
        !matches!(self, Stage::Dry)
    }

    /// What the operator must do before sampling
    pub fn instruction(self) -> &'static str {
        match self {
            Stage::Dry => "Dry calibration. Make sure the probe is dry and press enter",
            Stage::Low => "Low calibration. Put the probe in the low solution",
            Stage::High => "High calibration. Put the probe in the high solution",
        }
    }

    /// Hint shown when readings do not settle
    pub fn retry_hint(self) -> &'static str {
        match self {
            Stage::Dry => "Check connections and dryness",
            Stage::Low | Stage::High => "Check for trapped air",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Dry => write!(f, "dry"),
            Stage::Low => write!(f, "low"),
            Stage::High => write!(f, "high"),
        }
    }
}

/// Position within one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    AwaitConfirm,
    Sampling,
    Committing,
    Done,
}

/// What happened in the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// Operator confirmed (and entered the solution value, if needed)
    Confirmed,
    /// Readings settled
    Stable,
    /// Readings did not settle in time
    Unstable,
    /// Transducer accepted the calibration point
    Committed,
}

impl StepState {
    /// Next state, or `None` if the event cannot happen here
    pub fn next(self, event: StepEvent) -> Option<StepState> {
        match (self, event) {
            (StepState::AwaitConfirm, StepEvent::Confirmed) => Some(StepState::Sampling),
            (StepState::Sampling, StepEvent::Stable) => Some(StepState::Committing),
            (StepState::Sampling, StepEvent::Unstable) => Some(StepState::AwaitConfirm),
            (StepState::Committing, StepEvent::Committed) => Some(StepState::Done),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = StepState::AwaitConfirm;
        for event in [StepEvent::Confirmed, StepEvent::Stable, StepEvent::Committed] {
            state = state.next(event).unwrap();
        }
        assert_eq!(state, StepState::Done);
    }

    #[test]
    fn test_unstable_returns_to_confirm() {
        assert_eq!(
            StepState::Sampling.next(StepEvent::Unstable),
            Some(StepState::AwaitConfirm)
        );
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(StepState::AwaitConfirm.next(StepEvent::Stable), None);
        assert_eq!(StepState::Committing.next(StepEvent::Unstable), None);
        assert_eq!(StepState::Done.next(StepEvent::Confirmed), None);
    }

    #[test]
    fn test_only_dry_skips_solution() {
        let needs: Vec<bool> = Stage::ALL.iter().map(|s| s.needs_solution()).collect();
        assert_eq!(needs, vec![false, true, true]);
    }
}
