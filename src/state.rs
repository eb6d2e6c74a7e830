//! Step state machine
//!
//! PENDING → RUNNING → {SUCCEEDED | FAILED | INCOMPLETE}
//! FAILED and INCOMPLETE may return to PENDING when the step is re-queued.
//! SUCCEEDED is final.

use serde::{Deserialize, Serialize};

/// Step state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    /// Queued, not yet run
    Pending,
    /// Workers dispatched to the pool
    Running,
    /// Every worker succeeded
    Succeeded,
    /// No worker succeeded
    Failed,
    /// Some, but not all, workers succeeded
    Incomplete,
}

impl StepState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: StepState) -> bool {
        match (self, target) {
            (StepState::Pending, StepState::Running) => true,
            // Replacing the workers of a step that has not run yet
            (StepState::Pending, StepState::Pending) => true,

            (StepState::Running, StepState::Succeeded) => true,
            (StepState::Running, StepState::Failed) => true,
            (StepState::Running, StepState::Incomplete) => true,

            // Retry
            (StepState::Failed, StepState::Pending) => true,
            (StepState::Incomplete, StepState::Pending) => true,

            _ => false,
        }
    }

    /// Whether the step has run to an outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Succeeded | StepState::Failed | StepState::Incomplete
        )
    }

    /// Whether re-queueing may replace this step's workers.
    pub fn is_requeueable(&self) -> bool {
        self.can_transition_to(StepState::Pending)
    }

    /// Classify a finished step from its success count.
    ///
    /// `expected` is the number of workers the step was queued with; workers
    /// that never produced a result count as unsuccessful.
    pub fn classify(successes: usize, expected: usize) -> StepState {
        if successes == 0 {
            StepState::Failed
        } else if successes >= expected {
            StepState::Succeeded
        } else {
            StepState::Incomplete
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Running => "running",
            StepState::Succeeded => "succeeded",
            StepState::Failed => "failed",
            StepState::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors for step state operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepStateError {
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: StepState, to: StepState },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_transitions() {
        assert!(StepState::Pending.can_transition_to(StepState::Running));
        assert!(StepState::Running.can_transition_to(StepState::Succeeded));
        assert!(StepState::Running.can_transition_to(StepState::Failed));
        assert!(StepState::Running.can_transition_to(StepState::Incomplete));
    }

    #[test]
    fn test_succeeded_is_final() {
        for target in [
            StepState::Pending,
            StepState::Running,
            StepState::Failed,
            StepState::Incomplete,
        ] {
            assert!(!StepState::Succeeded.can_transition_to(target));
        }
        assert!(!StepState::Succeeded.is_requeueable());
    }

    #[test]
    fn test_retry_transitions() {
        assert!(StepState::Failed.is_requeueable());
        assert!(StepState::Incomplete.is_requeueable());
        assert!(StepState::Pending.is_requeueable());
        assert!(!StepState::Running.is_requeueable());
    }

    #[test]
    fn test_cannot_skip_running() {
        assert!(!StepState::Pending.can_transition_to(StepState::Succeeded));
        assert!(!StepState::Failed.can_transition_to(StepState::Running));
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(StepState::classify(2, 2), StepState::Succeeded);
        assert_eq!(StepState::classify(1, 2), StepState::Incomplete);
        assert_eq!(StepState::classify(0, 2), StepState::Failed);
        assert_eq!(StepState::classify(0, 0), StepState::Failed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!StepState::Pending.is_terminal());
        assert!(!StepState::Running.is_terminal());
        assert!(StepState::Succeeded.is_terminal());
        assert!(StepState::Failed.is_terminal());
        assert!(StepState::Incomplete.is_terminal());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&StepState::Incomplete).unwrap();
        assert_eq!(json, r#""INCOMPLETE""#);
    }
}
