//! # Results
//!
//! Every outcome of an execution is a value. Validation errors, policy
//! denials, apply faults, timeouts and stale inputs all land in one
//! `Failure` enum inside `MutationResult`; only infrastructure faults travel
//! as `WritError`.

use crate::change::ChangeSet;
use crate::execution::ExecutionStatus;
use crate::mutation::{ValidationError, ValidationResult};
use crate::policy::PolicyDecision;
use crate::{ExecutionId, StateHash, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// FAILURE
// =============================================================================

/// Why an execution did not commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    /// `validate` returned errors.
    Validation(Vec<ValidationError>),
    /// At least one policy denied; carries every denial.
    PolicyDenied(Vec<PolicyDecision>),
    /// `apply` faulted (or panicked).
    Fault(String),
    /// `apply` did not finish within the configured limit.
    Timeout { limit_ms: u64 },
    /// The input state is not the head of its history: another execution
    /// committed against it first. Nothing was recorded.
    StaleState {
        expected: StateHash,
        found: StateHash,
    },
}

/// Discriminant of `Failure`, for counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Validation,
    PolicyDenied,
    Fault,
    Timeout,
    StaleState,
}

impl Failure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::PolicyDenied(_) => FailureKind::PolicyDenied,
            Self::Fault(_) => FailureKind::Fault,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::StaleState { .. } => FailureKind::StaleState,
        }
    }

    /// Terminal status matching this failure.
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Validation(_) => ExecutionStatus::Invalid,
            Self::PolicyDenied(_) => ExecutionStatus::Blocked,
            Self::Fault(_) | Self::StaleState { .. } => ExecutionStatus::Failed,
            Self::Timeout { .. } => ExecutionStatus::TimedOut,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(errors) => {
                let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(f, "invalid: {}", joined.join("; "))
            }
            Self::PolicyDenied(decisions) => {
                let joined: Vec<String> = decisions.iter().map(ToString::to_string).collect();
                write!(f, "blocked: {}", joined.join("; "))
            }
            Self::Fault(message) => write!(f, "failed: {}", message),
            Self::Timeout { limit_ms } => write!(f, "timed out after {}ms", limit_ms),
            Self::StaleState { expected, found } => write!(
                f,
                "stale state: history head is {:?}, execution started from {:?}",
                expected, found
            ),
        }
    }
}

// =============================================================================
// MUTATION RESULT
// =============================================================================

/// Outcome of one execution (or simulation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResult<S> {
    /// Present only on success.
    pub new_state: Option<S>,
    pub changes: ChangeSet,
    pub validation: ValidationResult,
    /// Every decision made, in evaluation order.
    pub decisions: Vec<PolicyDecision>,
    pub failure: Option<Failure>,
    pub status: ExecutionStatus,
    /// Set for committed executions only.
    pub execution_id: Option<ExecutionId>,
    pub simulated: bool,
    pub completed_at: Timestamp,
    pub elapsed: Duration,
}

impl<S> MutationResult<S> {
    /// A successful outcome with status `Completed`.
    #[must_use]
    pub fn succeeded(
        new_state: S,
        changes: ChangeSet,
        validation: ValidationResult,
        decisions: Vec<PolicyDecision>,
        completed_at: Timestamp,
        elapsed: Duration,
    ) -> Self {
        Self {
            new_state: Some(new_state),
            changes,
            validation,
            decisions,
            failure: None,
            status: ExecutionStatus::Completed,
            execution_id: None,
            simulated: false,
            completed_at,
            elapsed,
        }
    }

    /// A failed outcome; status follows the failure kind.
    #[must_use]
    pub fn failed(
        failure: Failure,
        validation: ValidationResult,
        decisions: Vec<PolicyDecision>,
        completed_at: Timestamp,
        elapsed: Duration,
    ) -> Self {
        Self {
            new_state: None,
            changes: ChangeSet::empty(completed_at),
            validation,
            decisions,
            status: failure.status(),
            failure: Some(failure),
            execution_id: None,
            simulated: false,
            completed_at,
            elapsed,
        }
    }

    #[must_use]
    pub fn with_execution_id(mut self, id: ExecutionId) -> Self {
        self.execution_id = Some(id);
        self
    }

    #[must_use]
    pub fn as_simulation(mut self) -> Self {
        self.simulated = true;
        self
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.new_state.is_some()
    }

    /// Denying decisions only.
    pub fn denials(&self) -> Vec<&PolicyDecision> {
        self.decisions.iter().filter(|d| d.is_denied()).collect()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(Failure::kind)
    }
}

// =============================================================================
// BATCH RESULT
// =============================================================================

/// Outcome of a sequence of executions with state threaded through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMutationResult<S> {
    pub final_state: S,
    /// One result per attempted mutation, in order.
    pub results: Vec<MutationResult<S>>,
    /// Union of the successful change sets, in execution order.
    pub changes: ChangeSet,
    pub success_count: usize,
    pub failure_count: usize,
    /// Mutations never attempted because the batch stopped early.
    pub skipped_count: usize,
    /// Sum of the per-item durations.
    pub total_elapsed: Duration,
}

impl<S> BatchMutationResult<S> {
    /// Aggregate per-item results.
    #[must_use]
    pub fn from_results(
        final_state: S,
        results: Vec<MutationResult<S>>,
        skipped_count: usize,
        at: Timestamp,
    ) -> Self {
        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = results.len() - success_count;
        let changes = ChangeSet::merge(
            results.iter().filter(|r| r.is_success()).map(|r| &r.changes),
            at,
        );
        let total_elapsed = results.iter().map(|r| r.elapsed).sum();
        Self {
            final_state,
            results,
            changes,
            success_count,
            failure_count,
            skipped_count,
            total_elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure_count == 0 && self.skipped_count == 0
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeRecorder;

    fn changes(path: &str) -> ChangeSet {
        let mut rec = ChangeRecorder::new(Timestamp(1));
        rec.added(path, 1).expect("record");
        rec.finish()
    }

    fn ok(value: i64, path: &str, millis: u64) -> MutationResult<i64> {
        MutationResult::succeeded(
            value,
            changes(path),
            ValidationResult::ok(),
            Vec::new(),
            Timestamp(1),
            Duration::from_millis(millis),
        )
    }

    #[test]
    fn failure_maps_to_terminal_status() {
        let denied = Failure::PolicyDenied(vec![PolicyDecision::deny("MaxQuota", "over")]);
        let result: MutationResult<i64> = MutationResult::failed(
            denied,
            ValidationResult::ok(),
            vec![PolicyDecision::deny("MaxQuota", "over")],
            Timestamp(1),
            Duration::ZERO,
        );

        assert!(!result.is_success());
        assert_eq!(result.status, ExecutionStatus::Blocked);
        assert_eq!(result.failure_kind(), Some(FailureKind::PolicyDenied));
        assert_eq!(result.denials().len(), 1);
        assert!(result.new_state.is_none());
        assert!(result.changes.is_empty());
    }

    #[test]
    fn batch_aggregates_only_successes() {
        let failed: MutationResult<i64> = MutationResult::failed(
            Failure::Fault("boom".into()),
            ValidationResult::ok(),
            Vec::new(),
            Timestamp(1),
            Duration::from_millis(5),
        );
        let batch = BatchMutationResult::from_results(
            3,
            vec![ok(1, "a", 2), failed, ok(3, "c", 4)],
            0,
            Timestamp(2),
        );

        assert_eq!(batch.success_count, 2);
        assert_eq!(batch.failure_count, 1);
        assert_eq!(batch.changes.paths().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(batch.total_elapsed, Duration::from_millis(11));
        assert!(!batch.is_success());
    }

    #[test]
    fn failure_display_lists_every_reason() {
        let failure = Failure::PolicyDenied(vec![
            PolicyDecision::deny("P1", "one"),
            PolicyDecision::deny("P2", "two"),
        ]);
        assert_eq!(failure.to_string(), "blocked: P1: deny (one); P2: deny (two)");
        assert_eq!(
            Failure::Timeout { limit_ms: 50 }.to_string(),
            "timed out after 50ms"
        );
    }
}
