//! Minimal counter domain shared by the unit tests of this crate.

use crate::change::ChangeRecorder;
use crate::mutation::{DomainState, Mutation, MutationFault, ValidationResult};
use crate::{MutationContext, MutationIntent, StateId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub id: String,
    pub value: i64,
}

impl Counter {
    pub fn new(id: &str, value: i64) -> Self {
        Self {
            id: id.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterOp {
    Add(i64),
    Fail(String),
}

impl DomainState for Counter {
    type Operation = CounterOp;
    const SHAPE: &'static str = "Counter";

    fn state_id(&self) -> StateId {
        StateId::new(self.id.clone())
    }
}

pub struct Step {
    op: CounterOp,
    intent: MutationIntent,
    context: MutationContext,
}

impl Step {
    pub fn add(amount: i64) -> Self {
        Self {
            op: CounterOp::Add(amount),
            intent: MutationIntent::new("Add", "counter"),
            context: MutationContext::new("tester"),
        }
    }

    pub fn fail(message: &str) -> Self {
        Self {
            op: CounterOp::Fail(message.to_string()),
            intent: MutationIntent::new("Fail", "counter"),
            context: MutationContext::new("tester"),
        }
    }
}

impl Mutation<Counter> for Step {
    fn intent(&self) -> &MutationIntent {
        &self.intent
    }

    fn context(&self) -> &MutationContext {
        &self.context
    }

    fn operation(&self) -> &CounterOp {
        &self.op
    }

    fn validate(&self, state: &Counter) -> ValidationResult {
        match &self.op {
            CounterOp::Add(amount) if state.value.saturating_add(*amount) < 0 => {
                ValidationResult::fail("Counter.value", "would go negative")
            }
            _ => ValidationResult::ok(),
        }
    }

    fn apply(
        &self,
        state: &Counter,
        changes: &mut ChangeRecorder,
    ) -> Result<Counter, MutationFault> {
        match &self.op {
            CounterOp::Add(amount) => {
                let value = state.value.saturating_add(*amount);
                changes.modified("Counter.value", state.value, value)?;
                Ok(Counter {
                    id: state.id.clone(),
                    value,
                })
            }
            CounterOp::Fail(message) => Err(MutationFault::Other(message.clone())),
        }
    }
}
