//! # Mutation Contract
//!
//! A mutation is a named, self-describing operation that validates and
//! transforms a state value. It carries its static `MutationIntent`, the
//! caller's `MutationContext`, and an explicit operation tag that policies
//! match on (no runtime type inspection of the mutation itself).

use crate::change::{ChangeError, ChangeRecorder, ChangeSet};
use crate::executor::Executor;
use crate::{MutationContext, MutationIntent, StateId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// DOMAIN STATE
// =============================================================================

/// A state shape that mutations can be applied to.
///
/// `Operation` is the closed set of mutation variants for this shape. Every
/// mutation exposes one, and policies `match` on it to decide which
/// mutations they inspect.
pub trait DomainState: Clone + Serialize + Send + Sync + 'static {
    /// Mutation variant tag, usually an enum carrying the mutation's parameters.
    type Operation: fmt::Debug + Send + Sync + 'static;

    /// Registry key for policies targeting this shape.
    const SHAPE: &'static str;

    /// History key used when the context does not override it.
    fn state_id(&self) -> StateId;
}

// =============================================================================
// VALIDATION
// =============================================================================

/// One validation failure at a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Outcome of `Mutation::validate`. Valid when it carries no errors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// A passing result.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// A failing result with one error.
    #[must_use]
    pub fn fail(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ok().with_error(path, message)
    }

    #[must_use]
    pub fn with_error(mut self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.errors.push(ValidationError::new(path, message));
        self
    }

    /// Concatenate the errors of two results.
    #[must_use]
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }
}

// =============================================================================
// FAULTS
// =============================================================================

/// A fault raised while applying a mutation.
///
/// The engine captures these into the result; they never escape to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationFault {
    /// The state did not satisfy a precondition discovered during `apply`.
    #[error("Precondition failed at '{path}': {message}")]
    Precondition { path: String, message: String },

    /// A change could not be recorded.
    #[error(transparent)]
    Change(#[from] ChangeError),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl MutationFault {
    #[must_use]
    pub fn precondition(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Precondition {
            path: path.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// MUTATION TRAIT
// =============================================================================

/// A mutation of state shape `S`.
pub trait Mutation<S: DomainState>: Send + Sync {
    /// Static description of what this mutation does.
    fn intent(&self) -> &MutationIntent;

    /// Who invoked it and why.
    fn context(&self) -> &MutationContext;

    /// The variant tag policies match on.
    fn operation(&self) -> &S::Operation;

    /// Check that the mutation can be applied to `state`.
    fn validate(&self, state: &S) -> ValidationResult;

    /// Compute the new state, recording every field-level delta.
    ///
    /// Must not perform external effects: a timed-out apply is abandoned,
    /// not stopped.
    fn apply(&self, state: &S, changes: &mut ChangeRecorder) -> Result<S, MutationFault>;

    /// Declared external effects, stored verbatim in the history entry.
    fn side_effects(&self) -> Vec<String> {
        Vec::new()
    }

    /// What `apply` would produce, without touching anything else.
    fn simulate(&self, state: &S, at: Timestamp) -> Result<(S, ChangeSet), MutationFault>
    where
        Self: Sized,
    {
        Executor::execute(self, state, at)
    }
}

impl<S: DomainState, M: Mutation<S> + ?Sized> Mutation<S> for Box<M> {
    fn intent(&self) -> &MutationIntent {
        (**self).intent()
    }

    fn context(&self) -> &MutationContext {
        (**self).context()
    }

    fn operation(&self) -> &S::Operation {
        (**self).operation()
    }

    fn validate(&self, state: &S) -> ValidationResult {
        (**self).validate(state)
    }

    fn apply(&self, state: &S, changes: &mut ChangeRecorder) -> Result<S, MutationFault> {
        (**self).apply(state, changes)
    }

    fn side_effects(&self) -> Vec<String> {
        (**self).side_effects()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Counter, CounterOp, Step};

    #[test]
    fn validation_result_merges_errors() {
        let merged = ValidationResult::fail("a", "bad")
            .merge(ValidationResult::ok())
            .merge(ValidationResult::fail("b", "worse"));

        assert!(!merged.is_valid());
        assert_eq!(merged.errors().len(), 2);
        assert_eq!(merged.errors()[1].to_string(), "b: worse");
    }

    #[test]
    fn simulate_runs_apply_without_side_effects() {
        let state = Counter::new("c", 1);
        let step = Step::add(4);

        let (next, changes) = step.simulate(&state, Timestamp(9)).expect("simulate");

        assert_eq!(next.value, 5);
        assert_eq!(state.value, 1);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.timestamp(), Timestamp(9));
        assert!(matches!(step.operation(), CounterOp::Add(4)));
    }

    #[test]
    fn boxed_mutations_delegate() {
        let boxed: Box<dyn Mutation<Counter>> = Box::new(Step::add(2));
        let (next, _) = boxed.simulate(&Counter::new("c", 1), Timestamp(1)).expect("simulate");
        assert_eq!(next.value, 3);
        assert_eq!(boxed.intent().operation(), "Add");
    }

    #[test]
    fn change_errors_convert_into_faults() {
        let fault: MutationFault = ChangeError::TooManyChanges.into();
        assert!(matches!(fault, MutationFault::Change(_)));
    }
}
