//! # redb-backed History Storage
//!
//! A disk-backed, append-only history store using the redb embedded
//! database. Every `append_all` is one ACID write transaction, so the single
//! redb writer also serializes appends for the same state id, and a rejected
//! batch leaves nothing behind.
//!
//! Entries are postcard-encoded and keyed by `(state_id, sequence)`, which
//! keeps each id's entries contiguous and in append order on disk.

use crate::history::{Head, HistoryStore, MutationHistory, MutationHistoryEntry, check_append};
use crate::{StateHash, StateId, Timestamp, WritError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;

/// Table for entries: (state_id, sequence) -> serialized entry bytes
const ENTRIES: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("entries");

/// Table for per-id heads: state_id -> (next sequence, last timestamp millis, last new_state_hash)
const HEADS: TableDefinition<&str, (u64, u64, [u8; 32])> = TableDefinition::new("heads");

/// Table for recorded execution ids: execution_id -> state_id
const EXECUTIONS: TableDefinition<u128, &str> = TableDefinition::new("executions");

fn storage_err(e: impl std::fmt::Display) -> WritError {
    WritError::Storage(e.to_string())
}

/// A disk-backed history store using redb.
pub struct RedbHistory {
    db: Database,
}

impl std::fmt::Debug for RedbHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbHistory").finish_non_exhaustive()
    }
}

impl RedbHistory {
    /// Open or create a history database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WritError> {
        let db = Database::create(path.as_ref()).map_err(|e| WritError::Io(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let _ = write_txn.open_table(ENTRIES).map_err(storage_err)?;
            let _ = write_txn.open_table(HEADS).map_err(storage_err)?;
            let _ = write_txn.open_table(EXECUTIONS).map_err(storage_err)?;
            write_txn.commit().map_err(storage_err)?;
        }

        Ok(Self { db })
    }

    fn decode(bytes: &[u8]) -> Result<MutationHistoryEntry, WritError> {
        postcard::from_bytes(bytes).map_err(|e| WritError::Serialization(e.to_string()))
    }
}

impl HistoryStore for RedbHistory {
    fn append_all(&self, entries: Vec<MutationHistoryEntry>) -> Result<(), WritError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut heads = write_txn.open_table(HEADS).map_err(storage_err)?;
            let mut executions = write_txn.open_table(EXECUTIONS).map_err(storage_err)?;
            let mut table = write_txn.open_table(ENTRIES).map_err(storage_err)?;

            for entry in &entries {
                let id = entry.state_id.as_str();
                let execution = entry.execution_id.0;
                if executions.get(execution).map_err(storage_err)?.is_some() {
                    return Err(WritError::DuplicateExecution(entry.execution_id));
                }

                let stored = heads.get(id).map_err(storage_err)?.map(|g| g.value());
                let (sequence, head) = match stored {
                    Some((next, last, hash)) => (
                        next,
                        Some(Head {
                            timestamp: Timestamp(last),
                            hash: StateHash(hash),
                        }),
                    ),
                    None => (0, None),
                };
                check_append(head, entry)?;

                let bytes = postcard::to_allocvec(entry)
                    .map_err(|e| WritError::Serialization(e.to_string()))?;
                table
                    .insert((id, sequence), bytes.as_slice())
                    .map_err(storage_err)?;
                heads
                    .insert(
                        id,
                        (
                            sequence.saturating_add(1),
                            entry.timestamp.0,
                            entry.new_state_hash.0,
                        ),
                    )
                    .map_err(storage_err)?;
                executions.insert(execution, id).map_err(storage_err)?;
            }
        }
        // Dropping the transaction on an early return above aborts it.
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn history(&self, state_id: &StateId) -> Result<MutationHistory, WritError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(ENTRIES).map_err(storage_err)?;
        let id = state_id.as_str();

        let mut entries = Vec::new();
        for row in table
            .range((id, 0u64)..=(id, u64::MAX))
            .map_err(storage_err)?
        {
            let (_key, value) = row.map_err(storage_err)?;
            entries.push(Self::decode(value.value())?);
        }
        Ok(MutationHistory::new(state_id.clone(), entries))
    }

    fn recent(
        &self,
        state_id: &StateId,
        count: usize,
    ) -> Result<Vec<MutationHistoryEntry>, WritError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(ENTRIES).map_err(storage_err)?;
        let id = state_id.as_str();

        let mut entries = Vec::with_capacity(count.min(64));
        for row in table
            .range((id, 0u64)..=(id, u64::MAX))
            .map_err(storage_err)?
            .rev()
            .take(count)
        {
            let (_key, value) = row.map_err(storage_err)?;
            entries.push(Self::decode(value.value())?);
        }
        entries.reverse();
        Ok(entries)
    }

    fn state_ids(&self) -> Result<Vec<StateId>, WritError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(HEADS).map_err(storage_err)?;

        let mut ids = Vec::new();
        for row in table.iter().map_err(storage_err)? {
            let (key, _value) = row.map_err(storage_err)?;
            ids.push(StateId::new(key.value()));
        }
        Ok(ids)
    }

    fn entry_count(&self) -> Result<usize, WritError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(ENTRIES).map_err(storage_err)?;
        let count = table.len().map_err(storage_err)?;
        Ok(count as usize)
    }
}

// =============================================================================
// TESTS
// =============================================================================
