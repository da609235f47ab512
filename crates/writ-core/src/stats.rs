//! # Statistics Aggregator
//!
//! Running counters over committed executions, for the whole engine and per
//! intent category. Means are exact (running sum over every commit); P50 and
//! P95 use the nearest-rank method over the most recent
//! `STATS_SAMPLE_WINDOW` samples.
//!
//! Durations are tracked in whole microseconds. No floats.

use crate::primitives::STATS_SAMPLE_WINDOW;
use crate::result::FailureKind;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Engine-wide figures.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MutationStatistics {
    pub total_executed: u64,
    pub mean_duration: Duration,
    pub p50_duration: Duration,
    pub p95_duration: Duration,
    pub last_updated: Option<Timestamp>,
    /// Failures by kind. Empty unless detailed metrics are enabled.
    pub failures: BTreeMap<FailureKind, u64>,
}

/// Figures for one intent category.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryStatistics {
    pub category: String,
    pub total_executed: u64,
    pub mean_duration: Duration,
    /// `None` unless detailed metrics are enabled.
    pub p50_duration: Option<Duration>,
    pub p95_duration: Option<Duration>,
    pub last_updated: Option<Timestamp>,
    pub failures: BTreeMap<FailureKind, u64>,
}

// =============================================================================
// PERCENTILES
// =============================================================================

/// Nearest-rank percentile of an ascending slice.
///
/// `pct` is clamped to `1..=100`. Returns `None` for an empty slice.
pub fn nearest_rank(sorted: &[u64], pct: u64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let pct = pct.clamp(1, 100);
    let n = sorted.len() as u64;
    let rank = (pct * n).div_ceil(100).max(1);
    sorted.get((rank - 1) as usize).copied()
}

#[derive(Debug, Default)]
struct Tally {
    count: u64,
    total_micros: u128,
    window: VecDeque<u64>,
    failures: BTreeMap<FailureKind, u64>,
    last_updated: Option<Timestamp>,
}

impl Tally {
    fn commit(&mut self, micros: u64, at: Timestamp, keep_sample: bool) {
        self.count = self.count.saturating_add(1);
        self.total_micros = self.total_micros.saturating_add(u128::from(micros));
        self.last_updated = Some(at);
        if keep_sample {
            if self.window.len() == STATS_SAMPLE_WINDOW {
                self.window.pop_front();
            }
            self.window.push_back(micros);
        }
    }

    fn fail(&mut self, kind: FailureKind) {
        *self.failures.entry(kind).or_insert(0) += 1;
    }

    fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let mean = self.total_micros / u128::from(self.count);
        Duration::from_micros(u64::try_from(mean).unwrap_or(u64::MAX))
    }

    /// (P50, P95) over the window.
    fn percentiles(&self) -> Option<(Duration, Duration)> {
        let mut sorted: Vec<u64> = self.window.iter().copied().collect();
        sorted.sort_unstable();
        let p50 = nearest_rank(&sorted, 50)?;
        let p95 = nearest_rank(&sorted, 95)?;
        Some((Duration::from_micros(p50), Duration::from_micros(p95)))
    }
}

// =============================================================================
// AGGREGATOR
// =============================================================================

#[derive(Debug, Default)]
struct Tallies {
    overall: Tally,
    categories: BTreeMap<String, Tally>,
}

/// Thread-safe running statistics for one engine instance.
#[derive(Debug, Default)]
pub struct StatisticsAggregator {
    detailed: bool,
    inner: RwLock<Tallies>,
}

impl StatisticsAggregator {
    #[must_use]
    pub fn new(detailed: bool) -> Self {
        Self {
            detailed,
            inner: RwLock::default(),
        }
    }

    pub fn is_detailed(&self) -> bool {
        self.detailed
    }

    /// Count one committed execution.
    pub fn record_commit(&self, category: &str, duration: Duration, at: Timestamp) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.overall.commit(micros, at, true);
        inner
            .categories
            .entry(category.to_string())
            .or_default()
            .commit(micros, at, self.detailed);
    }

    /// Count one failed execution. No-op unless detailed.
    pub fn record_failure(&self, category: &str, kind: FailureKind) {
        if !self.detailed {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.overall.fail(kind);
        inner
            .categories
            .entry(category.to_string())
            .or_default()
            .fail(kind);
    }

    pub fn snapshot(&self) -> MutationStatistics {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let (p50, p95) = inner
            .overall
            .percentiles()
            .unwrap_or((Duration::ZERO, Duration::ZERO));
        MutationStatistics {
            total_executed: inner.overall.count,
            mean_duration: inner.overall.mean(),
            p50_duration: p50,
            p95_duration: p95,
            last_updated: inner.overall.last_updated,
            failures: inner.overall.failures.clone(),
        }
    }

    /// Figures for `category`; zeroed if nothing was recorded for it.
    pub fn category(&self, category: &str) -> CategoryStatistics {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tally) = inner.categories.get(category) else {
            return CategoryStatistics {
                category: category.to_string(),
                ..CategoryStatistics::default()
            };
        };
        let percentiles = tally.percentiles();
        CategoryStatistics {
            category: category.to_string(),
            total_executed: tally.count,
            mean_duration: tally.mean(),
            p50_duration: percentiles.map(|p| p.0),
            p95_duration: percentiles.map(|p| p.1),
            last_updated: tally.last_updated,
            failures: tally.failures.clone(),
        }
    }

    /// Categories seen so far, sorted.
    pub fn categories(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.categories.keys().cloned().collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn nearest_rank_basics() {
        let sorted: Vec<u64> = (1..=20).collect();
        assert_eq!(nearest_rank(&sorted, 50), Some(10));
        assert_eq!(nearest_rank(&sorted, 95), Some(19));
        assert_eq!(nearest_rank(&sorted, 100), Some(20));
        assert_eq!(nearest_rank(&[7], 95), Some(7));
        assert_eq!(nearest_rank(&[], 50), None);
    }

    #[test]
    fn snapshot_tracks_mean_and_percentiles() {
        let stats = StatisticsAggregator::new(false);
        for (i, d) in [10u64, 20, 30, 40].iter().enumerate() {
            stats.record_commit("quota", ms(*d), Timestamp(i as u64));
        }
        let snap = stats.snapshot();

        assert_eq!(snap.total_executed, 4);
        assert_eq!(snap.mean_duration, ms(25));
        assert_eq!(snap.p50_duration, ms(20));
        assert_eq!(snap.p95_duration, ms(40));
        assert_eq!(snap.last_updated, Some(Timestamp(3)));
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        let snap = StatisticsAggregator::new(true).snapshot();
        assert_eq!(snap, MutationStatistics::default());
    }

    #[test]
    fn window_keeps_only_recent_samples() {
        let stats = StatisticsAggregator::new(false);
        for _ in 0..STATS_SAMPLE_WINDOW {
            stats.record_commit("c", ms(1), Timestamp(0));
        }
        for _ in 0..STATS_SAMPLE_WINDOW {
            stats.record_commit("c", ms(9), Timestamp(1));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.p50_duration, ms(9));
        assert_eq!(snap.mean_duration, ms(5));
    }

    #[test]
    fn category_percentiles_require_detailed_mode() {
        let plain = StatisticsAggregator::new(false);
        plain.record_commit("quota", ms(5), Timestamp(1));
        plain.record_failure("quota", FailureKind::PolicyDenied);
        let cat = plain.category("quota");
        assert_eq!(cat.total_executed, 1);
        assert_eq!(cat.p50_duration, None);
        assert!(cat.failures.is_empty());

        let detailed = StatisticsAggregator::new(true);
        detailed.record_commit("quota", ms(5), Timestamp(1));
        detailed.record_failure("quota", FailureKind::PolicyDenied);
        detailed.record_failure("quota", FailureKind::PolicyDenied);
        let cat = detailed.category("quota");
        assert_eq!(cat.p95_duration, Some(ms(5)));
        assert_eq!(cat.failures.get(&FailureKind::PolicyDenied), Some(&2));
        assert_eq!(detailed.snapshot().failures.get(&FailureKind::PolicyDenied), Some(&2));
    }

    #[test]
    fn unknown_category_is_zeroed() {
        let stats = StatisticsAggregator::new(true);
        let cat = stats.category("nothing");
        assert_eq!(cat.category, "nothing");
        assert_eq!(cat.total_executed, 0);
        assert!(stats.categories().is_empty());
    }
}
