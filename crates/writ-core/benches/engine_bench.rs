//! # Mutation Model Benchmarks
//!
//! Policy evaluation, change recording and history store throughput.
//!
//! Run with: `cargo bench -p writ-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde::{Deserialize, Serialize};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use writ_core::{
    ChangeRecorder, DomainState, ExecutionId, HistoryStore, InMemoryHistory, MutationContext,
    MutationHistoryEntry, MutationIntent, Policy, PolicyDecision, PolicyRegistry, StateHash,
    StateId, Timestamp, evaluate_policies, export_history,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Gauge {
    id: String,
    level: i64,
}

impl DomainState for Gauge {
    type Operation = i64;
    const SHAPE: &'static str = "Gauge";

    fn state_id(&self) -> StateId {
        StateId::new(self.id.clone())
    }
}

struct Ceiling {
    name: String,
    priority: i32,
    limit: i64,
}

impl Policy<Gauge> for Ceiling {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn evaluate(&self, delta: &i64, state: &Gauge, _ctx: &MutationContext) -> PolicyDecision {
        if state.level.saturating_add(*delta) > self.limit {
            PolicyDecision::deny(self.name.clone(), "over ceiling")
        } else {
            PolicyDecision::allow(self.name.clone())
        }
    }
}

fn populated_registry(size: usize) -> PolicyRegistry {
    let registry = PolicyRegistry::new();
    for i in 0..size {
        let policy = Ceiling {
            name: format!("ceiling-{}", i),
            priority: (i % 7) as i32,
            limit: 1_000 + i as i64,
        };
        let _ = registry.register::<Gauge>(Arc::new(policy));
    }
    registry
}

fn entry(seq: u64) -> MutationHistoryEntry {
    let mut rec = ChangeRecorder::new(Timestamp(seq));
    let _ = rec.modified("Gauge.level", seq as i64, seq as i64 + 1);
    MutationHistoryEntry {
        execution_id: ExecutionId(u128::from(seq)),
        state_id: StateId::new("g"),
        intent: MutationIntent::new("Raise", "gauge"),
        context: MutationContext::new("bench").at(Timestamp(seq)),
        changes: rec.finish(),
        side_effects: Vec::new(),
        timestamp: Timestamp(seq),
        duration: Duration::from_micros(10),
        previous_state_hash: StateHash([0; 32]),
        new_state_hash: StateHash([0; 32]),
    }
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_policy_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("policy_evaluation");
    let state = Gauge { id: "g".into(), level: 10 };
    let ctx = MutationContext::new("bench");

    for size in [1usize, 10, 100].iter() {
        let registry = populated_registry(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let policies = registry.policies::<Gauge>();
                black_box(evaluate_policies(&policies, &5, &state, &ctx))
            });
        });
    }

    group.finish();
}

fn bench_change_recording(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_recording");

    for size in [10usize, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut rec = ChangeRecorder::new(Timestamp(1));
                for i in 0..size {
                    let _ = rec.added(format!("Gauge.samples.s{}", i), i as i64);
                }
                black_box(rec.finish())
            });
        });
    }

    group.finish();
}

fn bench_history_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_append");

    for size in [100u64, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let store = InMemoryHistory::new();
                for seq in 0..size {
                    let _ = store.append(entry(seq));
                }
                black_box(store)
            });
        });
    }

    group.finish();
}

fn bench_history_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_queries");
    let store = InMemoryHistory::new();
    for seq in 0..5_000 {
        let _ = store.append(entry(seq));
    }
    let id = StateId::new("g");

    group.bench_function("range", |b| {
        b.iter(|| black_box(store.history_range(&id, Timestamp(1_000), Timestamp(2_000))))
    });
    group.bench_function("recent_50", |b| b.iter(|| black_box(store.recent(&id, 50))));
    group.bench_function("export_canonical", |b| b.iter(|| black_box(export_history(&store))));

    group.finish();
}

criterion_group!(
    benches,
    bench_policy_evaluation,
    bench_change_recording,
    bench_history_append,
    bench_history_queries
);
criterion_main!(benches);
