//! Persistent history backends.

pub mod redb_history;

pub use redb_history::RedbHistory;
