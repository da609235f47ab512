//! # History
//!
//! The append-only audit trail of committed executions.
//!
//! - Entries are written only for committed executions.
//! - Per state id, entries are kept in non-decreasing timestamp order; a
//!   store rejects an append older than the id's last entry.
//! - A store rejects an append that does not start from the id's head
//!   (`WritError::StaleState`) or reuses an execution id.
//! - Entries are never updated or deleted.
//! - Contiguous entries of one id form a hash chain:
//!   `entries[i].new_state_hash == entries[i + 1].previous_state_hash`.
//!
//! This module implements the `HistoryStore` trait for the in-memory
//! backend. The redb backend lives in `storage`.

use crate::change::ChangeSet;
use crate::{
    ExecutionId, MutationContext, MutationIntent, StateHash, StateId, Timestamp, WritError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

// =============================================================================
// ENTRY
// =============================================================================

/// One durable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationHistoryEntry {
    pub execution_id: ExecutionId,
    pub state_id: StateId,
    pub intent: MutationIntent,
    pub context: MutationContext,
    pub changes: ChangeSet,
    pub side_effects: Vec<String>,
    pub timestamp: Timestamp,
    pub duration: Duration,
    pub previous_state_hash: StateHash,
    pub new_state_hash: StateHash,
}

// =============================================================================
// HISTORY
// =============================================================================

/// Ordered audit trail of one state id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationHistory {
    pub state_id: StateId,
    entries: Vec<MutationHistoryEntry>,
}

/// Derived figures over one history.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryStatistics {
    pub total_entries: usize,
    pub distinct_actors: usize,
    pub by_category: BTreeMap<String, usize>,
    pub total_changes: usize,
    /// Mean change count per entry, in thousandths (1500 = 1.5 changes).
    pub mean_changes_milli: u64,
    pub first_at: Option<Timestamp>,
    pub last_at: Option<Timestamp>,
}

/// A defect found by `MutationHistory::verify_chain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityIssue {
    /// `entries[index - 1].new_state_hash != entries[index].previous_state_hash`.
    BrokenChain {
        index: usize,
        expected: StateHash,
        found: StateHash,
    },
    /// `entries[index]` is older than its predecessor.
    OutOfOrder { index: usize },
    /// `entries[index].changes` no longer matches its checksum.
    ChecksumMismatch { index: usize },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenChain {
                index,
                expected,
                found,
            } => write!(
                f,
                "entry {}: previous hash {} does not match {}",
                index, found, expected
            ),
            Self::OutOfOrder { index } => write!(f, "entry {}: timestamp out of order", index),
            Self::ChecksumMismatch { index } => {
                write!(f, "entry {}: change checksum mismatch", index)
            }
        }
    }
}

impl MutationHistory {
    #[must_use]
    pub fn new(state_id: StateId, entries: Vec<MutationHistoryEntry>) -> Self {
        Self { state_id, entries }
    }

    pub fn entries(&self) -> &[MutationHistoryEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<MutationHistoryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&MutationHistoryEntry> {
        self.entries.last()
    }

    pub fn statistics(&self) -> HistoryStatistics {
        let actors: BTreeSet<&str> = self
            .entries
            .iter()
            .map(|e| e.context.actor_id())
            .collect();
        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &self.entries {
            *by_category
                .entry(entry.intent.category().to_string())
                .or_insert(0) += 1;
        }
        let total_changes: usize = self.entries.iter().map(|e| e.changes.len()).sum();
        let mean_changes_milli = if self.entries.is_empty() {
            0
        } else {
            (total_changes as u64).saturating_mul(1000) / self.entries.len() as u64
        };

        HistoryStatistics {
            total_entries: self.entries.len(),
            distinct_actors: actors.len(),
            by_category,
            total_changes,
            mean_changes_milli,
            first_at: self.entries.first().map(|e| e.timestamp),
            last_at: self.entries.last().map(|e| e.timestamp),
        }
    }

    /// Audit the hash chain, timestamp order and change checksums.
    ///
    /// An empty vector means the history is intact.
    pub fn verify_chain(&self) -> Vec<IntegrityIssue> {
        let mut issues = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.changes.verify_checksum() {
                issues.push(IntegrityIssue::ChecksumMismatch { index });
            }
            let Some(prev) = index.checked_sub(1).and_then(|i| self.entries.get(i)) else {
                continue;
            };
            if entry.timestamp < prev.timestamp {
                issues.push(IntegrityIssue::OutOfOrder { index });
            }
            if prev.new_state_hash != entry.previous_state_hash {
                issues.push(IntegrityIssue::BrokenChain {
                    index,
                    expected: prev.new_state_hash,
                    found: entry.previous_state_hash,
                });
            }
        }
        issues
    }
}

// =============================================================================
// HISTORY STORE TRAIT
// =============================================================================

/// Append-only storage for history entries.
///
/// Implementations serialize appends per state id and must tolerate
/// concurrent appends for different ids. An append is accepted only when it
/// extends the id's chain: not older than the head, starting from the head's
/// `new_state_hash`, and carrying an execution id the store has not seen.
pub trait HistoryStore: Send + Sync + fmt::Debug {
    /// Append one entry.
    fn append(&self, entry: MutationHistoryEntry) -> Result<(), WritError> {
        self.append_all(vec![entry])
    }

    /// Append `entries` in order, all or nothing.
    ///
    /// Every entry is checked against the head left by the ones before it;
    /// on the first rejection nothing is written.
    fn append_all(&self, entries: Vec<MutationHistoryEntry>) -> Result<(), WritError>;

    /// Full history, oldest first.
    fn history(&self, state_id: &StateId) -> Result<MutationHistory, WritError>;

    /// Entries with `from <= timestamp <= to`, oldest first.
    fn history_range(
        &self,
        state_id: &StateId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<MutationHistory, WritError> {
        check_range(from, to)?;
        let entries = self
            .history(state_id)?
            .into_entries()
            .into_iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .collect();
        Ok(MutationHistory::new(state_id.clone(), entries))
    }

    /// The most recent `count` entries, oldest first (a suffix of `history`).
    fn recent(
        &self,
        state_id: &StateId,
        count: usize,
    ) -> Result<Vec<MutationHistoryEntry>, WritError> {
        let mut entries = self.history(state_id)?.into_entries();
        let skip = entries.len().saturating_sub(count);
        Ok(entries.split_off(skip))
    }

    /// Every id with at least one entry, sorted.
    fn state_ids(&self) -> Result<Vec<StateId>, WritError>;

    /// Total entries across ids.
    fn entry_count(&self) -> Result<usize, WritError>;
}

pub(crate) fn check_range(from: Timestamp, to: Timestamp) -> Result<(), WritError> {
    if from > to {
        return Err(WritError::InvalidRange { from, to });
    }
    Ok(())
}

/// Last entry of one state id, as far as append checks are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Head {
    pub timestamp: Timestamp,
    pub hash: StateHash,
}

impl Head {
    pub(crate) fn of(entry: &MutationHistoryEntry) -> Self {
        Self {
            timestamp: entry.timestamp,
            hash: entry.new_state_hash,
        }
    }
}

/// Whether `entry` may follow `head`.
pub(crate) fn check_append(
    head: Option<Head>,
    entry: &MutationHistoryEntry,
) -> Result<(), WritError> {
    let Some(head) = head else {
        return Ok(());
    };
    if entry.timestamp < head.timestamp {
        return Err(WritError::OutOfOrder {
            state_id: entry.state_id.clone(),
            last: head.timestamp,
            attempted: entry.timestamp,
        });
    }
    if entry.previous_state_hash != head.hash {
        return Err(WritError::StaleState {
            state_id: entry.state_id.clone(),
            expected: head.hash,
            found: entry.previous_state_hash,
        });
    }
    Ok(())
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Volatile history store. One write lock serializes all appends.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: BTreeMap<StateId, Vec<MutationHistoryEntry>>,
    executions: BTreeSet<ExecutionId>,
}

impl InMemoryHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistory {
    fn append_all(&self, entries: Vec<MutationHistoryEntry>) -> Result<(), WritError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        // Check the whole batch before touching the map.
        let mut heads: BTreeMap<&StateId, Option<Head>> = BTreeMap::new();
        let mut seen: BTreeSet<ExecutionId> = BTreeSet::new();
        for entry in &entries {
            if inner.executions.contains(&entry.execution_id) || !seen.insert(entry.execution_id)
            {
                return Err(WritError::DuplicateExecution(entry.execution_id));
            }
            let head = heads.entry(&entry.state_id).or_insert_with(|| {
                inner
                    .entries
                    .get(&entry.state_id)
                    .and_then(|list| list.last())
                    .map(Head::of)
            });
            check_append(*head, entry)?;
            *head = Some(Head::of(entry));
        }

        for entry in entries {
            inner.executions.insert(entry.execution_id);
            inner
                .entries
                .entry(entry.state_id.clone())
                .or_default()
                .push(entry);
        }
        Ok(())
    }

    fn history(&self, state_id: &StateId) -> Result<MutationHistory, WritError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let entries = inner.entries.get(state_id).cloned().unwrap_or_default();
        Ok(MutationHistory::new(state_id.clone(), entries))
    }

    fn recent(
        &self,
        state_id: &StateId,
        count: usize,
    ) -> Result<Vec<MutationHistoryEntry>, WritError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = inner.entries.get(state_id) else {
            return Ok(Vec::new());
        };
        let skip = list.len().saturating_sub(count);
        Ok(list[skip..].to_vec())
    }

    fn state_ids(&self) -> Result<Vec<StateId>, WritError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.entries.keys().cloned().collect())
    }

    fn entry_count(&self) -> Result<usize, WritError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.entries.values().map(Vec::len).sum())
    }
}

// =============================================================================
// TESTS
// =============================================================================
