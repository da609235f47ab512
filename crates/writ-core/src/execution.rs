//! # Execution State Machine
//!
//! ```text
//! Created -> Validating -> PolicyEvaluating -> Executing -> Recording -> Completed
//!    |           |               |                 |            |
//!    |           v               v                 +--> Failed <+ (stale input)
//!    |        Invalid         Blocked              +--> TimedOut
//!    +---------------------------^  (validation skipped)
//! ```
//!
//! `Executing -> Completed` exists only for simulations, which never record.

use crate::WritError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an execution is, or where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Created,
    Validating,
    PolicyEvaluating,
    Executing,
    Recording,
    Completed,
    Invalid,
    Blocked,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Invalid | Self::Blocked | Self::Failed | Self::TimedOut
        )
    }

    /// Whether the machine has an edge `self -> next`.
    pub fn can_transition_to(self, next: Self, simulation: bool) -> bool {
        use ExecutionStatus::{
            Blocked, Completed, Created, Executing, Failed, Invalid, PolicyEvaluating, Recording,
            TimedOut, Validating,
        };
        match (self, next) {
            (Created, Validating | PolicyEvaluating)
            | (Validating, PolicyEvaluating | Invalid)
            | (PolicyEvaluating, Executing | Blocked)
            | (Executing, Failed | TimedOut)
            | (Recording, Completed | Failed) => true,
            (Executing, Recording) => !simulation,
            (Executing, Completed) => simulation,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Validating => "validating",
            Self::PolicyEvaluating => "policy-evaluating",
            Self::Executing => "executing",
            Self::Recording => "recording",
            Self::Completed => "completed",
            Self::Invalid => "invalid",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::TimedOut => "timed-out",
        };
        f.write_str(label)
    }
}

/// Drives one execution through the machine, refusing illegal edges.
#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    simulation: bool,
    path: Vec<ExecutionStatus>,
}

impl ExecutionTracker {
    /// A tracker in `Created`.
    #[must_use]
    pub fn new(simulation: bool) -> Self {
        Self {
            simulation,
            path: vec![ExecutionStatus::Created],
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.path
            .last()
            .copied()
            .unwrap_or(ExecutionStatus::Created)
    }

    /// Every status visited, starting with `Created`.
    pub fn path(&self) -> &[ExecutionStatus] {
        &self.path
    }

    pub fn is_simulation(&self) -> bool {
        self.simulation
    }

    pub fn advance(&mut self, next: ExecutionStatus) -> Result<ExecutionStatus, WritError> {
        let current = self.status();
        if !current.can_transition_to(next, self.simulation) {
            return Err(WritError::IllegalTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.path.push(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionStatus::*;
    use super::*;

    #[test]
    fn happy_path_commits_through_recording() {
        let mut tracker = ExecutionTracker::new(false);
        for next in [Validating, PolicyEvaluating, Executing, Recording, Completed] {
            tracker.advance(next).expect("legal");
        }
        assert_eq!(tracker.status(), Completed);
        assert_eq!(tracker.path().len(), 6);
        assert!(tracker.status().is_terminal());
    }

    #[test]
    fn recording_can_fail_on_stale_input() {
        let mut tracker = ExecutionTracker::new(false);
        for next in [PolicyEvaluating, Executing, Recording, Failed] {
            tracker.advance(next).expect("legal");
        }
        assert_eq!(tracker.status(), Failed);
        assert!(!Recording.can_transition_to(TimedOut, false));
    }

    #[test]
    fn validation_can_be_skipped() {
        let mut tracker = ExecutionTracker::new(false);
        tracker.advance(PolicyEvaluating).expect("legal");
        tracker.advance(Blocked).expect("legal");
        assert_eq!(tracker.status(), Blocked);
    }

    #[test]
    fn simulation_skips_recording() {
        let mut sim = ExecutionTracker::new(true);
        for next in [Validating, PolicyEvaluating, Executing] {
            sim.advance(next).expect("legal");
        }
        assert!(sim.clone().advance(Recording).is_err());
        sim.advance(Completed).expect("legal");

        let mut real = ExecutionTracker::new(false);
        for next in [Validating, PolicyEvaluating, Executing] {
            real.advance(next).expect("legal");
        }
        assert!(real.advance(Completed).is_err());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [Completed, Invalid, Blocked, Failed, TimedOut] {
            for next in [Created, Validating, Executing, Recording, Completed] {
                assert!(!terminal.can_transition_to(next, false));
                assert!(!terminal.can_transition_to(next, true));
            }
        }
    }

    #[test]
    fn illegal_transition_is_an_error() {
        let mut tracker = ExecutionTracker::new(false);
        let err = tracker.advance(Executing).expect_err("illegal");
        assert!(matches!(err, WritError::IllegalTransition { .. }));
        assert_eq!(tracker.status(), Created);
    }
}
