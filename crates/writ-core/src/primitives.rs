//! # Innate Primitives
//!
//! Hardcoded runtime constants for the writ CORE.
//!
//! These are compiled into the binary and are immutable at runtime.

/// Separator between segments of a change path (`UserQuotas.alice`).
pub const PATH_SEPARATOR: char = '.';

/// Maximum length of a change path.
///
/// Paths longer than this are rejected when a change is recorded.
pub const MAX_PATH_LENGTH: usize = 512;

/// Maximum number of changes a single execution may record.
///
/// Bounds the memory a runaway `apply` can consume.
pub const MAX_CHANGES_PER_EXECUTION: usize = 10_000;

/// Number of recent duration samples kept for percentile computation.
///
/// Means are exact over all executions; P50/P95 are computed over this window.
pub const STATS_SAMPLE_WINDOW: usize = 1024;

/// Default process-wide ceiling on in-flight executions.
pub const DEFAULT_MAX_CONCURRENT_MUTATIONS: usize = 10;

/// Magic bytes for the canonical history export format.
pub const EXPORT_MAGIC: [u8; 4] = *b"WRHX";

/// Current canonical history export format version.
pub const EXPORT_VERSION: u8 = 1;

/// Maximum number of entries accepted by a canonical import.
///
/// Validated from the header BEFORE the payload is decoded.
pub const MAX_IMPORT_ENTRY_COUNT: u64 = 1_000_000;
