//! # writ-core
//!
//! The deterministic mutation model for writ - THE LOGIC.
//!
//! A mutation is a named operation that validates and transforms an
//! immutable domain state. Before it runs, pluggable policies decide whether
//! it may; after it commits, an append-only, hash-chained history records
//! exactly what changed, who asked and why.
//!
//! ## Architectural Constraints
//!
//! - NO async, NO network dependencies (pure Rust)
//! - BTreeMap only, integer arithmetic only
//! - Domain rejections are values; `WritError` is reserved for infrastructure
//! - Policies and mutations plug in through traits; there is no global state
//!
//! The async orchestration (timeouts, concurrency limiting, observers) lives
//! in the `writ` app crate.

// =============================================================================
// MODULES
// =============================================================================

pub mod change;
pub mod context;
pub mod execution;
pub mod executor;
pub mod export;
pub mod history;
pub mod intent;
pub mod mutation;
pub mod policy;
pub mod primitives;
pub mod result;
pub mod stats;
pub mod storage;
pub mod types;
pub mod value;

#[cfg(test)]
mod testing;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Clock, ExecutionId, ManualClock, StateHash, StateId, SystemClock, Timestamp, WritError,
};
pub use value::Value;

// =============================================================================
// RE-EXPORTS: Mutation Model
// =============================================================================

pub use change::{ChangeError, ChangeKind, ChangeRecorder, ChangeSet, StateChange};
pub use context::MutationContext;
pub use execution::{ExecutionStatus, ExecutionTracker};
pub use executor::Executor;
pub use intent::{MutationIntent, RiskLevel};
pub use mutation::{DomainState, Mutation, MutationFault, ValidationError, ValidationResult};
pub use policy::{
    Policy, PolicyDecision, PolicyInfo, PolicyRegistry, PolicyVerdict, evaluate_policies,
};
pub use result::{BatchMutationResult, Failure, FailureKind, MutationResult};

// =============================================================================
// RE-EXPORTS: History & Statistics
// =============================================================================

pub use export::{HistoryArchive, HistoryHeader, export_history, import_history, verify_export};
pub use history::{
    HistoryStatistics, HistoryStore, InMemoryHistory, IntegrityIssue, MutationHistory,
    MutationHistoryEntry,
};
pub use stats::{CategoryStatistics, MutationStatistics, StatisticsAggregator};
pub use storage::RedbHistory;
