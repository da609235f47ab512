//! # Executor
//!
//! Applies an already validated and allowed mutation to a state.
//!
//! No policies, no validation, no audit. Faults from `apply` propagate to
//! the caller unmodified: nothing is caught, retried or logged here.

use crate::change::{ChangeRecorder, ChangeSet};
use crate::mutation::{DomainState, Mutation, MutationFault};
use crate::Timestamp;

/// Stateless executor.
pub struct Executor;

impl Executor {
    /// Run `apply` against `state` and freeze the recorded changes.
    pub fn execute<S, M>(
        mutation: &M,
        state: &S,
        at: Timestamp,
    ) -> Result<(S, ChangeSet), MutationFault>
    where
        S: DomainState,
        M: Mutation<S> + ?Sized,
    {
        let mut recorder = ChangeRecorder::new(at);
        let next = mutation.apply(state, &mut recorder)?;
        Ok((next, recorder.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Counter, Step};

    #[test]
    fn execute_returns_new_state_and_frozen_changes() {
        let state = Counter::new("c", 10);
        let (next, changes) =
            Executor::execute(&Step::add(-3), &state, Timestamp(1)).expect("execute");

        assert_eq!(next.value, 7);
        assert_eq!(changes.len(), 1);
        assert!(changes.verify_checksum());
    }

    #[test]
    fn faults_propagate_unmodified() {
        let state = Counter::new("c", 10);
        let err = Executor::execute(&Step::fail("boom"), &state, Timestamp(1))
            .expect_err("must fail");

        assert_eq!(err, MutationFault::Other("boom".to_string()));
    }

    #[test]
    fn works_through_trait_objects() {
        let state = Counter::new("c", 0);
        let boxed: Box<dyn Mutation<Counter>> = Box::new(Step::add(2));
        let (next, _) = Executor::execute(boxed.as_ref(), &state, Timestamp(1)).expect("execute");
        assert_eq!(next.value, 2);
    }
}
