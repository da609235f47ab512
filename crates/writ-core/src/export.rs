//! # Canonical History Export
//!
//! A redb file is not bit-identical across runs, so audits and backups use
//! a canonical postcard stream instead:
//!
//! ```text
//! [header_len: u32 LE] [HistoryHeader (postcard)] [HistoryArchive (postcard)]
//! ```
//!
//! Entries are ordered by state id, then by append order. The header carries
//! the entry count and a BLAKE3-derived checksum of the archive bytes; both
//! are checked before the archive is decoded.

use crate::history::{HistoryStore, MutationHistoryEntry};
use crate::primitives::{EXPORT_MAGIC, EXPORT_VERSION, MAX_IMPORT_ENTRY_COUNT};
use crate::{StateId, WritError};
use serde::{Deserialize, Serialize};

// =============================================================================
// FORMAT
// =============================================================================

/// Header of a canonical export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub entry_count: u64,
    /// First eight bytes (LE) of the BLAKE3 hash of the archive section.
    pub checksum: u64,
}

impl HistoryHeader {
    #[must_use]
    pub fn new(entry_count: u64, checksum: u64) -> Self {
        Self {
            magic: EXPORT_MAGIC,
            version: EXPORT_VERSION,
            entry_count,
            checksum,
        }
    }

    /// Check magic and version. Messages stay generic.
    pub fn validate(&self) -> Result<(), WritError> {
        if self.magic != EXPORT_MAGIC {
            return Err(WritError::Corrupted("Invalid file format".to_string()));
        }
        if self.version != EXPORT_VERSION {
            return Err(WritError::Corrupted("Unsupported file version".to_string()));
        }
        if self.entry_count > MAX_IMPORT_ENTRY_COUNT {
            return Err(WritError::Corrupted(format!(
                "Entry count {} exceeds maximum allowed {}",
                self.entry_count, MAX_IMPORT_ENTRY_COUNT
            )));
        }
        Ok(())
    }
}

/// Every entry of a store, in canonical order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HistoryArchive {
    pub entries: Vec<MutationHistoryEntry>,
}

impl HistoryArchive {
    /// Snapshot a store.
    pub fn from_store(store: &dyn HistoryStore) -> Result<Self, WritError> {
        let mut entries = Vec::new();
        for id in store.state_ids()? {
            entries.extend(store.history(&id)?.into_entries());
        }
        Ok(Self { entries })
    }

    /// Distinct ids in the archive, sorted.
    pub fn state_ids(&self) -> Vec<StateId> {
        let mut ids: Vec<StateId> = self.entries.iter().map(|e| e.state_id.clone()).collect();
        ids.dedup();
        ids
    }

    /// Append every entry to `store`, in archive order, as one batch.
    ///
    /// The archive must extend each id's current chain. If any entry is
    /// rejected (older than the head, stale, or an execution id the store
    /// already holds) nothing is written.
    pub fn restore_into(&self, store: &dyn HistoryStore) -> Result<usize, WritError> {
        store.append_all(self.entries.clone())?;
        Ok(self.entries.len())
    }
}

fn payload_checksum(bytes: &[u8]) -> u64 {
    let hash = blake3::hash(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Export a store to the canonical format.
pub fn export_history(store: &dyn HistoryStore) -> Result<Vec<u8>, WritError> {
    let archive = HistoryArchive::from_store(store)?;

    let data_bytes = postcard::to_allocvec(&archive)
        .map_err(|e| WritError::Serialization(format!("Data: {}", e)))?;
    let header = HistoryHeader::new(archive.entries.len() as u64, payload_checksum(&data_bytes));
    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| WritError::Serialization(format!("Header: {}", e)))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);
    Ok(result)
}

/// Decode a canonical export.
pub fn import_history(data: &[u8]) -> Result<HistoryArchive, WritError> {
    let Some(len_bytes) = data.get(..4) else {
        return Err(WritError::Corrupted("Data too short".to_string()));
    };
    let mut len = [0u8; 4];
    len.copy_from_slice(len_bytes);
    let header_len = u32::from_le_bytes(len) as usize;

    let Some(header_bytes) = data.get(4..4usize.saturating_add(header_len)) else {
        return Err(WritError::Corrupted("Data too short for header".to_string()));
    };
    let header: HistoryHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| WritError::Corrupted(format!("Header: {}", e)))?;
    header.validate()?;

    let data_bytes = &data[4 + header_len..];
    let computed = payload_checksum(data_bytes);
    if computed != header.checksum {
        return Err(WritError::Corrupted(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }

    let archive: HistoryArchive = postcard::from_bytes(data_bytes)
        .map_err(|e| WritError::Corrupted(format!("Data: {}", e)))?;
    if archive.entries.len() as u64 != header.entry_count {
        return Err(WritError::Corrupted("Entry count mismatch".to_string()));
    }
    Ok(archive)
}

/// Whether `data` is exactly the canonical export of `store`.
pub fn verify_export(store: &dyn HistoryStore, data: &[u8]) -> Result<bool, WritError> {
    let imported = import_history(data)?;
    Ok(imported == HistoryArchive::from_store(store)?)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::history::tests::entry;

    fn populated() -> InMemoryHistory {
        let store = InMemoryHistory::new();
        store.append(entry("b", 0, 1, 1, "x")).expect("append");
        store.append(entry("a", 0, 4, 2, "y")).expect("append");
        store.append(entry("b", 1, 2, 3, "x")).expect("append");
        store
    }

    #[test]
    fn roundtrip_restores_every_entry() {
        let store = populated();
        let bytes = export_history(&store).expect("export");

        let archive = import_history(&bytes).expect("import");
        assert_eq!(archive.entries.len(), 3);
        assert_eq!(archive.state_ids(), vec![StateId::new("a"), StateId::new("b")]);

        let restored = InMemoryHistory::new();
        assert_eq!(archive.restore_into(&restored).expect("restore"), 3);
        assert!(verify_export(&restored, &bytes).expect("verify"));
    }

    #[test]
    fn export_is_deterministic() {
        let first = export_history(&populated()).expect("export");
        let second = export_history(&populated()).expect("export");
        assert_eq!(first, second);
    }

    #[test]
    fn header_validation() {
        assert!(HistoryHeader::new(3, 0).validate().is_ok());

        let mut bad = HistoryHeader::new(0, 0);
        bad.magic = *b"XXXX";
        assert!(bad.validate().is_err());

        let mut bad = HistoryHeader::new(0, 0);
        bad.version = 99;
        assert!(bad.validate().is_err());

        assert!(HistoryHeader::new(MAX_IMPORT_ENTRY_COUNT + 1, 0).validate().is_err());
    }

    #[test]
    fn corrupted_import_empty_data() {
        assert!(matches!(import_history(&[]), Err(WritError::Corrupted(_))));
        assert!(import_history(&[0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn corrupted_import_header_length_exceeds_data() {
        let mut data = vec![0xe8, 0x03, 0x00, 0x00];
        data.extend_from_slice(&[0x00, 0x00, 0x00]);
        assert!(import_history(&data).is_err());
    }

    #[test]
    fn corrupted_import_checksum_mismatch() {
        let mut bytes = export_history(&populated()).expect("export");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let err = import_history(&bytes).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"), "{}", err);
    }

    #[test]
    fn restoring_the_same_export_twice_changes_nothing() {
        let store = populated();
        let bytes = export_history(&store).expect("export");
        let archive = import_history(&bytes).expect("import");

        let err = archive.restore_into(&store).unwrap_err();
        assert!(matches!(err, WritError::DuplicateExecution(_)), "{}", err);
        assert_eq!(store.entry_count().expect("count"), 3);
        for id in store.state_ids().expect("ids") {
            assert!(store.history(&id).expect("history").verify_chain().is_empty());
        }
        assert!(verify_export(&store, &bytes).expect("verify"));
    }

    #[test]
    fn verify_detects_divergent_store() {
        let bytes = export_history(&populated()).expect("export");
        let other = InMemoryHistory::new();
        other.append(entry("a", 0, 4, 2, "y")).expect("append");
        assert!(!verify_export(&other, &bytes).expect("verify"));
    }
}
