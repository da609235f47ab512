//! # Change Model
//!
//! Field-level deltas produced by one execution.
//!
//! - `StateChange` is one delta on a dot-delimited path.
//! - `ChangeRecorder` is the only mutable accumulator. A mutation's `apply`
//!   receives one and records into it.
//! - `ChangeSet` is the frozen result. It exposes no way to append: once
//!   returned inside a result it can only be read, checksummed or merged
//!   into a NEW set.

use crate::primitives::{MAX_CHANGES_PER_EXECUTION, MAX_PATH_LENGTH, PATH_SEPARATOR};
use crate::{Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// CHANGE KIND
// =============================================================================

/// What happened at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A value appeared where there was none.
    Added,
    /// An existing value changed.
    Modified,
    /// An existing value disappeared.
    Removed,
    /// A whole sub-tree was swapped out.
    Replaced,
}

// =============================================================================
// STATE CHANGE
// =============================================================================

/// One field-level delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    path: String,
    old_value: Option<Value>,
    new_value: Option<Value>,
    kind: ChangeKind,
    timestamp: Timestamp,
    priority: i32,
    metadata: BTreeMap<String, Value>,
}

impl StateChange {
    /// Create a change with priority 0 and no metadata.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        kind: ChangeKind,
        old_value: Option<Value>,
        new_value: Option<Value>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            path: path.into(),
            old_value,
            new_value,
            kind,
            timestamp,
            priority: 0,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the conflict-resolution priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn old_value(&self) -> Option<&Value> {
        self.old_value.as_ref()
    }

    pub fn new_value(&self) -> Option<&Value> {
        self.new_value.as_ref()
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// Path segments (`"UserQuotas.alice"` -> `["UserQuotas", "alice"]`).
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split(PATH_SEPARATOR)
    }
}

/// Errors raised while recording a change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeError {
    #[error("Invalid change path '{0}'")]
    InvalidPath(String),

    #[error("Change path exceeds {MAX_PATH_LENGTH} bytes")]
    PathTooLong,

    #[error("Execution recorded more than {MAX_CHANGES_PER_EXECUTION} changes")]
    TooManyChanges,
}

fn validate_path(path: &str) -> Result<(), ChangeError> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(ChangeError::PathTooLong);
    }
    if path.is_empty() || path.split(PATH_SEPARATOR).any(str::is_empty) {
        return Err(ChangeError::InvalidPath(path.to_string()));
    }
    Ok(())
}

// =============================================================================
// CHANGE RECORDER
// =============================================================================

/// Accumulates the changes of one execution.
///
/// Every change recorded through the convenience methods is stamped with the
/// recorder's timestamp, so an execution's changes share one instant.
#[derive(Debug)]
pub struct ChangeRecorder {
    at: Timestamp,
    changes: Vec<StateChange>,
}

impl ChangeRecorder {
    /// Start recording an execution happening at `at`.
    #[must_use]
    pub fn new(at: Timestamp) -> Self {
        Self {
            at,
            changes: Vec::new(),
        }
    }

    /// The execution's timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.at
    }

    /// Record a fully-built change.
    pub fn record(&mut self, change: StateChange) -> Result<(), ChangeError> {
        validate_path(&change.path)?;
        if self.changes.len() >= MAX_CHANGES_PER_EXECUTION {
            return Err(ChangeError::TooManyChanges);
        }
        self.changes.push(change);
        Ok(())
    }

    pub fn added(
        &mut self,
        path: impl Into<String>,
        new_value: impl Into<Value>,
    ) -> Result<(), ChangeError> {
        self.record(StateChange::new(
            path,
            ChangeKind::Added,
            None,
            Some(new_value.into()),
            self.at,
        ))
    }

    pub fn modified(
        &mut self,
        path: impl Into<String>,
        old_value: impl Into<Value>,
        new_value: impl Into<Value>,
    ) -> Result<(), ChangeError> {
        self.record(StateChange::new(
            path,
            ChangeKind::Modified,
            Some(old_value.into()),
            Some(new_value.into()),
            self.at,
        ))
    }

    pub fn removed(
        &mut self,
        path: impl Into<String>,
        old_value: impl Into<Value>,
    ) -> Result<(), ChangeError> {
        self.record(StateChange::new(
            path,
            ChangeKind::Removed,
            Some(old_value.into()),
            None,
            self.at,
        ))
    }

    pub fn replaced(
        &mut self,
        path: impl Into<String>,
        old_value: impl Into<Value>,
        new_value: impl Into<Value>,
    ) -> Result<(), ChangeError> {
        self.record(StateChange::new(
            path,
            ChangeKind::Replaced,
            Some(old_value.into()),
            Some(new_value.into()),
            self.at,
        ))
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Freeze the recorded changes into a `ChangeSet`.
    #[must_use]
    pub fn finish(self) -> ChangeSet {
        ChangeSet::frozen(self.changes, self.at)
    }
}

// =============================================================================
// CHANGE SET
// =============================================================================

/// The ordered, frozen deltas of one execution (or of a whole batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: Vec<StateChange>,
    timestamp: Timestamp,
    checksum: Option<u64>,
}

impl ChangeSet {
    /// An empty set with no checksum (used by failed executions).
    #[must_use]
    pub fn empty(at: Timestamp) -> Self {
        Self {
            changes: Vec::new(),
            timestamp: at,
            checksum: None,
        }
    }

    fn frozen(changes: Vec<StateChange>, at: Timestamp) -> Self {
        let checksum = compute_checksum(&changes);
        Self {
            changes,
            timestamp: at,
            checksum,
        }
    }

    /// Union of several sets, in the order given. Builds a new set.
    #[must_use]
    pub fn merge<'a>(sets: impl IntoIterator<Item = &'a ChangeSet>, at: Timestamp) -> Self {
        let changes: Vec<StateChange> = sets
            .into_iter()
            .flat_map(|set| set.changes.iter().cloned())
            .collect();
        Self::frozen(changes, at)
    }

    pub fn changes(&self) -> &[StateChange] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn checksum(&self) -> Option<u64> {
        self.checksum
    }

    /// All paths touched, in recording order (duplicates kept).
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(StateChange::path)
    }

    /// Recompute the checksum and compare with the stored one.
    ///
    /// A set without a checksum verifies only when it is empty.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        match self.checksum {
            Some(stored) => compute_checksum(&self.changes) == Some(stored),
            None => self.changes.is_empty(),
        }
    }

    /// One winning change per path.
    ///
    /// The highest `priority` wins; on equal priority the later change wins.
    /// Output keeps the order in which each path was first touched.
    #[must_use]
    pub fn resolve_conflicts(&self) -> Vec<&StateChange> {
        let mut order: Vec<&str> = Vec::new();
        let mut winners: BTreeMap<&str, &StateChange> = BTreeMap::new();

        for change in &self.changes {
            match winners.get(change.path()) {
                Some(current) if current.priority > change.priority => {}
                Some(_) => {
                    winners.insert(change.path(), change);
                }
                None => {
                    order.push(change.path());
                    winners.insert(change.path(), change);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|path| winners.get(path).copied())
            .collect()
    }
}

/// First 8 bytes (LE) of BLAKE3 over the postcard encoding of the changes.
///
/// Order-sensitive: the same changes in a different order checksum differently.
fn compute_checksum(changes: &[StateChange]) -> Option<u64> {
    let bytes = postcard::to_allocvec(changes).ok()?;
    let digest = blake3::hash(&bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    Some(u64::from_le_bytes(head))
}

// =============================================================================
// TESTS
// =============================================================================
