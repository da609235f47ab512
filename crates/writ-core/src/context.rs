//! # Mutation Context
//!
//! *Who* invoked a mutation and *why*. Built by the caller for each
//! invocation and stored verbatim in the history entry of a committed
//! execution. The engine never reads any ambient, host-managed context:
//! whatever it needs must be in here.

use crate::{StateId, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-invocation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationContext {
    actor_id: String,
    actor_name: Option<String>,
    reason: Option<String>,
    correlation_id: Option<String>,
    metadata: BTreeMap<String, Value>,
    timestamp: Timestamp,
    state_id: Option<StateId>,
}

impl MutationContext {
    /// Context for `actor_id`, stamped at time zero until `at` is called.
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_name: None,
            reason: None,
            correlation_id: None,
            metadata: BTreeMap::new(),
            timestamp: Timestamp::default(),
            state_id: None,
        }
    }

    #[must_use]
    pub fn with_actor_name(mut self, name: impl Into<String>) -> Self {
        self.actor_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the history key. Without it the state value decides its own id.
    #[must_use]
    pub fn with_state_id(mut self, id: impl Into<StateId>) -> Self {
        self.state_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn actor_name(&self) -> Option<&str> {
        self.actor_name.as_deref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn state_id(&self) -> Option<&StateId> {
        self.state_id.as_ref()
    }

    /// Split a comma-separated text entry into trimmed, non-empty items.
    ///
    /// Missing keys and non-text values yield an empty list.
    pub fn metadata_list(&self, key: &str) -> Vec<&str> {
        self.get(key)
            .and_then(Value::as_text)
            .map(|text| {
                text.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
