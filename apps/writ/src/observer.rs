//! # Lifecycle Observers
//!
//! Observers receive best-effort notifications as an execution moves through
//! its lifecycle. They are called synchronously, in registration order, and
//! each call is isolated: an observer that returns an error or panics is
//! logged and skipped, and the execution continues unaffected.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;
use writ_core::{ChangeSet, ExecutionId, Failure, MutationContext, MutationIntent, StateId};

/// Where in the lifecycle a notification was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    /// Validation and policies passed; `apply` is about to run.
    Before,
    /// Committed and recorded.
    After,
    /// `apply` faulted or timed out.
    Failed,
    /// A policy denied.
    Blocked,
    /// Validation failed.
    Invalid,
}

/// One notification. Borrowed from the engine for the duration of the call.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleEvent<'a> {
    pub stage: LifecycleStage,
    pub shape: &'static str,
    pub state_id: &'a StateId,
    pub intent: &'a MutationIntent,
    pub context: &'a MutationContext,
    /// Set on `After`.
    pub execution_id: Option<ExecutionId>,
    /// Set on `After`.
    pub changes: Option<&'a ChangeSet>,
    /// Set on `Failed`, `Blocked` and `Invalid`.
    pub failure: Option<&'a Failure>,
}

/// Error an observer may report. Never affects the execution.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

/// A lifecycle notification sink.
pub trait MutationObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &LifecycleEvent<'_>) -> Result<(), ObserverError>;
}

/// Forwards notifications to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl MutationObserver for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&self, event: &LifecycleEvent<'_>) -> Result<(), ObserverError> {
        let operation = event.intent.operation();
        let actor = event.context.actor_id();
        match event.stage {
            LifecycleStage::Before => {
                tracing::debug!(operation, actor, state_id = %event.state_id, "mutation starting");
            }
            LifecycleStage::After => {
                let changes = event.changes.map(ChangeSet::len).unwrap_or(0);
                tracing::info!(
                    operation,
                    actor,
                    state_id = %event.state_id,
                    changes,
                    "mutation committed"
                );
            }
            LifecycleStage::Failed | LifecycleStage::Blocked | LifecycleStage::Invalid => {
                let reason = event.failure.map(ToString::to_string).unwrap_or_default();
                tracing::warn!(
                    operation,
                    actor,
                    state_id = %event.state_id,
                    %reason,
                    "mutation rejected"
                );
            }
        }
        Ok(())
    }
}

/// Message carried by a panic payload, if it is a string.
pub(crate) fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fixed, ordered observer list owned by an engine.
#[derive(Clone, Default)]
pub(crate) struct Observers {
    list: Vec<Arc<dyn MutationObserver>>,
}

impl Observers {
    pub(crate) fn new(list: Vec<Arc<dyn MutationObserver>>) -> Self {
        Self { list }
    }

    pub(crate) fn len(&self) -> usize {
        self.list.len()
    }

    /// Deliver `event` to every observer, isolating each call.
    pub(crate) fn notify(&self, event: &LifecycleEvent<'_>) {
        for observer in &self.list {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        observer = observer.name(),
                        stage = ?event.stage,
                        "observer failed: {}",
                        err
                    );
                }
                Err(payload) => {
                    tracing::warn!(
                        observer = observer.name(),
                        stage = ?event.stage,
                        "observer panicked: {}",
                        panic_payload_to_string(payload.as_ref())
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Log(Mutex<Vec<String>>);

    impl MutationObserver for Log {
        fn name(&self) -> &str {
            "log"
        }

        fn on_event(&self, event: &LifecycleEvent<'_>) -> Result<(), ObserverError> {
            self.0.lock().unwrap().push(format!("{:?}", event.stage));
            Ok(())
        }
    }

    struct Broken;

    impl MutationObserver for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn on_event(&self, _event: &LifecycleEvent<'_>) -> Result<(), ObserverError> {
            Err(ObserverError("disk full".into()))
        }
    }

    struct Panicky;

    impl MutationObserver for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn on_event(&self, _event: &LifecycleEvent<'_>) -> Result<(), ObserverError> {
            panic!("observer bug")
        }
    }

    #[test]
    fn faulty_observers_do_not_stop_delivery() {
        let log = Arc::new(Log(Mutex::new(Vec::new())));
        let observers = Observers::new(vec![
            Arc::new(Broken),
            Arc::new(Panicky),
            log.clone(),
            Arc::new(TracingObserver),
        ]);
        let id = StateId::new("s");
        let intent = MutationIntent::new("Op", "cat");
        let context = MutationContext::new("actor");
        let event = LifecycleEvent {
            stage: LifecycleStage::Before,
            shape: "S",
            state_id: &id,
            intent: &intent,
            context: &context,
            execution_id: None,
            changes: None,
            failure: None,
        };

        observers.notify(&event);
        observers.notify(&LifecycleEvent { stage: LifecycleStage::After, ..event });

        assert_eq!(observers.len(), 4);
        assert_eq!(*log.0.lock().unwrap(), vec!["Before", "After"]);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_payload_to_string(payload.as_ref()), "boom");
    }
}
