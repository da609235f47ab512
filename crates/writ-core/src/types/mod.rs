//! # Core Type Definitions
//!
//! This module contains the identifier and infrastructure types shared by every
//! other module of the writ CORE:
//! - Identifiers (`StateId`, `ExecutionId`, `StateHash`)
//! - Time (`Timestamp`, `Clock`, `SystemClock`, `ManualClock`)
//! - Infrastructure errors (`WritError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Use saturating arithmetic for counters to prevent overflow

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of one logical state value whose history is tracked.
///
/// All history entries for the same `StateId` form one hash chain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId(pub String);

impl StateId {
    /// Create a new state identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier of one committed execution.
///
/// The CORE never generates these (no randomness); the engine allocates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub u128);

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// BLAKE3 digest of the canonical (postcard) encoding of a state value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateHash(pub [u8; 32]);

impl StateHash {
    /// Hash a state value.
    ///
    /// The encoding is postcard, which is bit-exact for a given value as long as
    /// the state only uses ordered collections.
    pub fn of<S: Serialize>(state: &S) -> Result<Self, WritError> {
        let bytes = postcard::to_allocvec(state)
            .map_err(|e| WritError::Serialization(format!("State hash: {}", e)))?;
        Ok(Self(*blake3::hash(&bytes).as_bytes()))
    }

    /// Hex representation (64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// =============================================================================
// TIME
// =============================================================================

/// Milliseconds since the UNIX epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp from raw milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Raw milliseconds.
    #[must_use]
    pub const fn millis(self) -> u64 {
        self.0
    }

    /// Add milliseconds using saturating arithmetic.
    #[must_use]
    pub const fn saturating_add(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of timestamps for changes, contexts and history entries.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

/// A clock that only moves when told to.
///
/// Used for deterministic replays and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(start.0),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time (may move backward).
    pub fn set(&self, at: Timestamp) {
        self.millis.store(at.0, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.millis.load(Ordering::SeqCst))
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Infrastructure errors of the writ system.
///
/// Domain rejections (validation errors, policy denials, apply faults,
/// timeouts) are NOT errors: they are returned as data inside results.
/// A `WritError` aborts the call that raised it and is never retried.
#[derive(Debug, Error)]
pub enum WritError {
    /// The history store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Two different state types registered under the same shape key.
    #[error("Shape '{shape}' is already bound to a different state type")]
    ShapeConflict { shape: &'static str },

    /// An append would put a state's history out of timestamp order.
    #[error("Out-of-order append for '{state_id}': {attempted} is older than {last}")]
    OutOfOrder {
        state_id: StateId,
        last: Timestamp,
        attempted: Timestamp,
    },

    /// An append whose `previous_state_hash` is not the id's chain head.
    #[error("Stale state for '{state_id}': head is {expected:?}, entry starts from {found:?}")]
    StaleState {
        state_id: StateId,
        expected: StateHash,
        found: StateHash,
    },

    /// An execution id that the store already holds.
    #[error("Duplicate execution {0}")]
    DuplicateExecution(ExecutionId),

    /// The execution state machine was driven along an edge it does not have.
    #[error("Illegal execution transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// Configuration values are unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A time-range query with `from > to`.
    #[error("Invalid range: {from} > {to}")]
    InvalidRange { from: Timestamp, to: Timestamp },

    /// Stored or imported data failed an integrity check.
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    /// The engine can no longer accept executions.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_hash_is_deterministic() {
        let a = StateHash::of(&vec![1u64, 2, 3]).expect("hash");
        let b = StateHash::of(&vec![1u64, 2, 3]).expect("hash");
        let c = StateHash::of(&vec![3u64, 2, 1]).expect("hash");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn execution_id_formats_as_fixed_width_hex() {
        assert_eq!(ExecutionId(255).to_string().len(), 32);
        assert!(ExecutionId(255).to_string().ends_with("ff"));
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(Timestamp(1_000));
        assert_eq!(clock.now(), Timestamp(1_000));

        clock.advance(25);
        assert_eq!(clock.now(), Timestamp(1_025));

        clock.set(Timestamp(10));
        assert_eq!(clock.now(), Timestamp(10));
    }

    #[test]
    fn timestamp_saturating_add() {
        assert_eq!(Timestamp(u64::MAX).saturating_add(1), Timestamp(u64::MAX));
        assert_eq!(Timestamp(1).saturating_add(1), Timestamp(2));
    }
}
