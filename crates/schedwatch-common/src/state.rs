//! Detection cycle state machine.
//!
//! One cycle walks SAMPLING → SUSPENDED → RESAMPLING → EVALUATING and back to
//! SAMPLING. STOPPED is reachable only from SAMPLING, where the stop request
//! is checked, and is terminal.

use crate::error::{WatchError, WatchResult};
use std::fmt;

/// States of the detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DetectionState {
    /// Taking the start-of-cycle sample; stop requests are observed here.
    #[default]
    Sampling,
    /// Blocked in the bounded interruptible wait.
    Suspended,
    /// Taking the end-of-cycle sample.
    Resampling,
    /// Computing deltas and classifying the cycle.
    Evaluating,
    /// Loop terminated by a stop request.
    Stopped,
}

impl fmt::Display for DetectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sampling => write!(f, "SAMPLING"),
            Self::Suspended => write!(f, "SUSPENDED"),
            Self::Resampling => write!(f, "RESAMPLING"),
            Self::Evaluating => write!(f, "EVALUATING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl DetectionState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: DetectionState) -> bool {
        use DetectionState::{Evaluating, Resampling, Sampling, Stopped, Suspended};

        matches!(
            (self, target),
            (Sampling, Suspended)
                | (Suspended, Resampling)
                | (Resampling, Evaluating)
                | (Evaluating, Sampling)
                | (Sampling, Stopped)
        )
    }

    /// Returns true once the loop has terminated.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// State machine wrapper counting completed cycles.
#[derive(Debug, Clone, Default)]
pub struct DetectionStateMachine {
    current: DetectionState,
    cycles_completed: u64,
}

impl DetectionStateMachine {
    /// Create a new state machine starting in SAMPLING.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> DetectionState {
        self.current
    }

    /// Number of times EVALUATING handed back to SAMPLING.
    #[must_use]
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidStateTransition`] if `target` is not
    /// reachable from the current state.
    pub fn transition(&mut self, target: DetectionState) -> WatchResult<()> {
        if !self.current.can_transition_to(target) {
            return Err(WatchError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }

        if self.current == DetectionState::Evaluating {
            self.cycles_completed += 1;
        }
        self.current = target;
        Ok(())
    }
}
