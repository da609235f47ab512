//! # History Store Tests
//!
//! The redb and in-memory backends must behave identically, and a canonical
//! export of one must restore into the other.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use writ_core::{
    ChangeRecorder, ExecutionId, HistoryStore, InMemoryHistory, IntegrityIssue, MutationContext,
    MutationHistory, MutationHistoryEntry, MutationIntent, RedbHistory, StateHash, StateId,
    Timestamp, WritError, export_history, import_history, verify_export,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Doc {
    id: String,
    revision: u64,
}

fn execution_id(id: &str, revision: u64, at: u64) -> ExecutionId {
    let key = format!("{}@{}#{}", id, at, revision);
    let mut head = [0u8; 16];
    head.copy_from_slice(&blake3::hash(key.as_bytes()).as_bytes()[..16]);
    ExecutionId(u128::from_le_bytes(head))
}

fn entry(id: &str, revision: u64, at: u64, actor: &str, category: &str) -> MutationHistoryEntry {
    let mut rec = ChangeRecorder::new(Timestamp(at));
    rec.modified("Doc.revision", revision as i64, revision as i64 + 1)
        .expect("record");
    rec.added(format!("Doc.log.r{}", revision + 1), actor)
        .expect("record");
    MutationHistoryEntry {
        execution_id: execution_id(id, revision, at),
        state_id: StateId::new(id),
        intent: MutationIntent::new("Edit", category),
        context: MutationContext::new(actor).with_reason("edit").at(Timestamp(at)),
        changes: rec.finish(),
        side_effects: vec![format!("notify:{}", actor)],
        timestamp: Timestamp(at),
        duration: Duration::from_micros(250),
        previous_state_hash: StateHash::of(&Doc { id: id.into(), revision }).expect("hash"),
        new_state_hash: StateHash::of(&Doc {
            id: id.into(),
            revision: revision + 1,
        })
        .expect("hash"),
    }
}

fn backends() -> (TempDir, Vec<Box<dyn HistoryStore>>) {
    let dir = TempDir::new().expect("tempdir");
    let redb = RedbHistory::open(dir.path().join("h.redb")).expect("open");
    (dir, vec![Box::new(InMemoryHistory::new()), Box::new(redb)])
}

// =============================================================================
// CONTRACT
// =============================================================================

#[test]
fn backends_agree_on_reads() {
    let (_dir, stores) = backends();
    for store in &stores {
        store.append(entry("doc-1", 0, 100, "alice", "edit")).expect("append");
        store.append(entry("doc-1", 1, 100, "bob", "edit")).expect("append");
        store.append(entry("doc-2", 0, 150, "alice", "create")).expect("append");
        store.append(entry("doc-1", 2, 200, "carol", "review")).expect("append");
    }

    let snapshots: Vec<_> = stores
        .iter()
        .map(|s| s.history(&StateId::new("doc-1")).expect("history"))
        .collect();
    assert_eq!(snapshots[0], snapshots[1]);

    let stats = snapshots[0].statistics();
    assert_eq!(stats.total_entries, 3);
    assert_eq!(stats.distinct_actors, 3);
    assert_eq!(stats.total_changes, 6);
    assert_eq!(stats.mean_changes_milli, 2000);
    assert_eq!(stats.by_category.get("edit"), Some(&2));
    assert!(snapshots[0].verify_chain().is_empty());

    for store in &stores {
        assert_eq!(store.entry_count().expect("count"), 4);
        let latest = store.recent(&StateId::new("doc-1"), 1).expect("recent");
        assert_eq!(latest[0].timestamp, Timestamp(200));
        assert!(store.history(&StateId::new("missing")).expect("history").is_empty());
    }
}

#[test]
fn repeated_reads_are_identical() {
    let (_dir, stores) = backends();
    for store in &stores {
        for r in 0..5 {
            store.append(entry("d", r, r * 10, "a", "edit")).expect("append");
        }
        let id = StateId::new("d");
        assert_eq!(store.history(&id).expect("h"), store.history(&id).expect("h"));
        assert_eq!(
            store.history_range(&id, Timestamp(10), Timestamp(30)).expect("r"),
            store.history_range(&id, Timestamp(10), Timestamp(30)).expect("r")
        );
    }
}

#[test]
fn both_backends_reject_stale_appends_and_bad_ranges() {
    let (_dir, stores) = backends();
    for store in &stores {
        store.append(entry("d", 0, 50, "a", "edit")).expect("append");
        assert!(matches!(
            store.append(entry("d", 1, 49, "a", "edit")),
            Err(WritError::OutOfOrder { .. })
        ));
        // Revision 0 is no longer d's head.
        assert!(matches!(
            store.append(entry("d", 0, 60, "b", "edit")),
            Err(WritError::StaleState { .. })
        ));
        // Other ids are unaffected by d's clock.
        store.append(entry("e", 0, 1, "a", "edit")).expect("append");
        assert!(matches!(
            store.history_range(&StateId::new("d"), Timestamp(9), Timestamp(1)),
            Err(WritError::InvalidRange { .. })
        ));
    }
}

#[test]
fn concurrent_appends_keep_each_id_ordered() {
    let dir = TempDir::new().expect("tempdir");
    let store = Arc::new(RedbHistory::open(dir.path().join("c.redb")).expect("open"));

    let handles: Vec<_> = ["x", "y", "z"]
        .into_iter()
        .map(|id| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for r in 0..20u64 {
                    store.append(entry(id, r, r, "worker", "edit")).expect("append");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }

    assert_eq!(store.entry_count().expect("count"), 60);
    for id in ["x", "y", "z"] {
        let history = store.history(&StateId::new(id)).expect("history");
        assert_eq!(history.len(), 20);
        assert!(history.verify_chain().is_empty());
    }
}

#[test]
fn stores_refuse_a_broken_chain_that_verify_would_flag() {
    let (_dir, stores) = backends();
    for store in &stores {
        store.append(entry("d", 0, 1, "a", "edit")).expect("append");
        assert!(matches!(
            store.append(entry("d", 5, 2, "a", "edit")),
            Err(WritError::StaleState { .. })
        ));
        assert_eq!(store.entry_count().expect("count"), 1);
    }

    // The same gap in an imported or tampered history is reported.
    let history = MutationHistory::new(
        StateId::new("d"),
        vec![entry("d", 0, 1, "a", "edit"), entry("d", 5, 2, "a", "edit")],
    );
    let issues = history.verify_chain();
    assert!(matches!(issues.as_slice(), [IntegrityIssue::BrokenChain { index: 1, .. }]));
}

// =============================================================================
// EXPORT
// =============================================================================

#[test]
fn export_from_redb_restores_into_memory() {
    let dir = TempDir::new().expect("tempdir");
    let redb = RedbHistory::open(dir.path().join("src.redb")).expect("open");
    for r in 0..4 {
        redb.append(entry("doc", r, r * 5, "alice", "edit")).expect("append");
    }
    redb.append(entry("other", 0, 3, "bob", "create")).expect("append");

    let bytes = export_history(&redb).expect("export");
    let archive = import_history(&bytes).expect("import");
    let memory = InMemoryHistory::new();
    assert_eq!(archive.restore_into(&memory).expect("restore"), 5);

    assert!(verify_export(&memory, &bytes).expect("verify"));
    assert_eq!(
        memory.history(&StateId::new("doc")).expect("history"),
        redb.history(&StateId::new("doc")).expect("history")
    );
}

#[test]
fn restore_refuses_to_rewind_existing_history() {
    let source = InMemoryHistory::new();
    source.append(entry("doc", 0, 5, "a", "edit")).expect("append");
    let bytes = export_history(&source).expect("export");

    let target = InMemoryHistory::new();
    target.append(entry("doc", 9, 100, "a", "edit")).expect("append");
    let archive = import_history(&bytes).expect("import");
    assert!(archive.restore_into(&target).is_err());
    assert_eq!(target.entry_count().expect("count"), 1);
}

#[test]
fn importing_an_export_twice_into_redb_is_rejected_whole() {
    let dir = TempDir::new().expect("tempdir");
    let redb = RedbHistory::open(dir.path().join("twice.redb")).expect("open");
    redb.append(entry("a", 0, 1, "alice", "edit")).expect("append");
    redb.append(entry("bb", 0, 2, "bob", "edit")).expect("append");
    redb.append(entry("bb", 1, 3, "bob", "edit")).expect("append");

    let bytes = export_history(&redb).expect("export");
    let archive = import_history(&bytes).expect("import");
    assert!(archive.restore_into(&redb).is_err());

    assert_eq!(redb.entry_count().expect("count"), 3);
    for id in ["a", "bb"] {
        assert!(redb.history(&StateId::new(id)).expect("history").verify_chain().is_empty());
    }
    assert!(verify_export(&redb, &bytes).expect("verify"));
}

#[test]
fn restore_extends_an_existing_chain() {
    let source = InMemoryHistory::new();
    source.append(entry("doc", 1, 10, "a", "edit")).expect("append");
    source.append(entry("doc", 2, 20, "a", "edit")).expect("append");
    let archive = import_history(&export_history(&source).expect("export")).expect("import");

    let target = InMemoryHistory::new();
    target.append(entry("doc", 0, 5, "a", "edit")).expect("append");
    assert_eq!(archive.restore_into(&target).expect("restore"), 2);

    let history = target.history(&StateId::new("doc")).expect("history");
    assert_eq!(history.len(), 3);
    assert!(history.verify_chain().is_empty());
}
