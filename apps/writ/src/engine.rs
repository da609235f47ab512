//! # Mutation Engine
//!
//! Async orchestrator over the pure `writ-core` model.
//!
//! ```text
//! execute(mutation, state)
//!   ├─ acquire in-flight permit            (process-wide Semaphore)
//!   ├─ Validating        validate()        -> Invalid
//!   ├─ PolicyEvaluating  every policy      -> Blocked
//!   ├─ Before notification
//!   ├─ Executing         apply() on the blocking pool, raced against the timeout
//!   │                                      -> Failed | TimedOut
//!   └─ Recording         append + statistics on a detached task
//!                        -> Completed | Failed (input is not the chain head)
//! ```
//!
//! Dropping the returned future cancels the execution only up to the
//! executor step. Once recording starts it runs to completion on its own
//! task, so the audit trail never holds half an execution.

use crate::config::MutationEngineOptions;
use crate::observer::{
    LifecycleEvent, LifecycleStage, MutationObserver, Observers, panic_payload_to_string,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::Instrument;
use writ_core::{
    BatchMutationResult, CategoryStatistics, ChangeSet, Clock, DomainState, ExecutionId,
    ExecutionStatus, ExecutionTracker, Executor, Failure, HistoryStore, InMemoryHistory, Mutation,
    MutationHistory, MutationHistoryEntry, MutationResult, MutationStatistics, Policy,
    PolicyDecision, PolicyRegistry, StateHash, StateId, StatisticsAggregator, SystemClock,
    Timestamp, ValidationResult, WritError, evaluate_policies,
};

// =============================================================================
// BUILDER
// =============================================================================

/// Assembles a `MutationEngine`.
#[derive(Default)]
pub struct MutationEngineBuilder {
    options: MutationEngineOptions,
    history: Option<Arc<dyn HistoryStore>>,
    clock: Option<Arc<dyn Clock>>,
    observers: Vec<Arc<dyn MutationObserver>>,
}

impl MutationEngineBuilder {
    #[must_use]
    pub fn options(mut self, options: MutationEngineOptions) -> Self {
        self.options = options;
        self
    }

    /// History backend. Defaults to `InMemoryHistory`.
    #[must_use]
    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Time source. Defaults to `SystemClock`.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Append an observer. Observers are notified in the order added.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn MutationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<MutationEngine, WritError> {
        self.options.validate()?;
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(InMemoryHistory::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Ok(MutationEngine {
            limiter: Arc::new(Semaphore::new(self.options.max_concurrent_mutations)),
            stats: Arc::new(StatisticsAggregator::new(self.options.enable_detailed_metrics)),
            last_stamp: Arc::new(Mutex::new(Timestamp(0))),
            registry: PolicyRegistry::new(),
            observers: Observers::new(self.observers),
            options: self.options,
            history,
            clock,
        })
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Policy-governed mutation engine.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct MutationEngine {
    options: MutationEngineOptions,
    registry: PolicyRegistry,
    history: Arc<dyn HistoryStore>,
    stats: Arc<StatisticsAggregator>,
    clock: Arc<dyn Clock>,
    observers: Observers,
    limiter: Arc<Semaphore>,
    /// Last timestamp handed to a history entry. Held while appending.
    last_stamp: Arc<Mutex<Timestamp>>,
}

impl std::fmt::Debug for MutationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationEngine")
            .field("options", &self.options)
            .field("registry", &self.registry)
            .field("history", &self.history)
            .field("observers", &self.observers.len())
            .field("available_permits", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}

/// What the executor step produced.
enum Outcome<S> {
    Applied(S, ChangeSet),
    Faulted(String),
    TimedOut(Duration),
}

impl MutationEngine {
    #[must_use]
    pub fn builder() -> MutationEngineBuilder {
        MutationEngineBuilder::default()
    }

    /// Engine with in-memory history and the system clock.
    pub fn new(options: MutationEngineOptions) -> Result<Self, WritError> {
        Self::builder().options(options).build()
    }

    pub fn options(&self) -> &MutationEngineOptions {
        &self.options
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    // =========================================================================
    // POLICIES
    // =========================================================================

    pub fn register_policy<S, P>(&self, policy: P) -> Result<(), WritError>
    where
        S: DomainState,
        P: Policy<S> + 'static,
    {
        let name = policy.name().to_string();
        self.registry.register::<S>(Arc::new(policy))?;
        tracing::debug!(shape = S::SHAPE, policy = %name, "policy registered");
        Ok(())
    }

    /// Remove every policy of `S` named `name`. Returns how many were removed.
    pub fn unregister_policy<S: DomainState>(&self, name: &str) -> usize {
        self.registry.unregister::<S>(name)
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Validate, authorize, apply and record one mutation.
    ///
    /// Rejections come back inside the result, including an input state
    /// that another execution already moved past (`Failure::StaleState`).
    /// `Err` means the history store (or the engine itself) failed.
    pub async fn execute<S, M>(
        &self,
        mutation: M,
        state: &S,
    ) -> Result<MutationResult<S>, WritError>
    where
        S: DomainState,
        M: Mutation<S> + 'static,
    {
        self.run(Arc::new(mutation), state, false).await
    }

    /// Everything `execute` does short of recording: no history entry, no
    /// statistics, no notifications.
    pub async fn simulate<S, M>(
        &self,
        mutation: M,
        state: &S,
    ) -> Result<MutationResult<S>, WritError>
    where
        S: DomainState,
        M: Mutation<S> + 'static,
    {
        self.run(Arc::new(mutation), state, true).await
    }

    /// Execute in order, threading each successful state into the next.
    ///
    /// A failed item's input state is carried forward. With
    /// `stop_batch_on_first_failure` the rest of the batch is skipped.
    pub async fn execute_batch<S, M, I>(
        &self,
        mutations: I,
        initial: S,
    ) -> Result<BatchMutationResult<S>, WritError>
    where
        S: DomainState,
        M: Mutation<S> + 'static,
        I: IntoIterator<Item = M>,
    {
        let mutations: Vec<M> = mutations.into_iter().collect();
        let total = mutations.len();
        let span = tracing::info_span!("mutation_batch", shape = S::SHAPE, size = total);

        async move {
            let mut state = initial;
            let mut results = Vec::with_capacity(total);
            for mutation in mutations {
                let result = self.run(Arc::new(mutation), &state, false).await?;
                let failed = !result.is_success();
                if let Some(next) = &result.new_state {
                    state = next.clone();
                }
                results.push(result);
                if failed && self.options.stop_batch_on_first_failure {
                    tracing::debug!(attempted = results.len(), "batch stopped on failure");
                    break;
                }
            }
            let skipped = total - results.len();
            let batch =
                BatchMutationResult::from_results(state, results, skipped, self.clock.now());
            tracing::info!(
                succeeded = batch.success_count,
                failed = batch.failure_count,
                skipped = batch.skipped_count,
                "batch finished"
            );
            Ok(batch)
        }
        .instrument(span)
        .await
    }

    async fn run<S: DomainState>(
        &self,
        mutation: Arc<dyn Mutation<S>>,
        state: &S,
        simulation: bool,
    ) -> Result<MutationResult<S>, WritError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| WritError::Unavailable("concurrency limiter closed".to_string()))?;

        let state_id = mutation
            .context()
            .state_id()
            .cloned()
            .unwrap_or_else(|| state.state_id());
        let span = tracing::info_span!(
            "mutation",
            operation = mutation.intent().operation(),
            category = mutation.intent().category(),
            state_id = %state_id,
            simulation
        );
        self.run_inner(mutation, state, state_id, simulation)
            .instrument(span)
            .await
    }

    async fn run_inner<S: DomainState>(
        &self,
        mutation: Arc<dyn Mutation<S>>,
        state: &S,
        state_id: StateId,
        simulation: bool,
    ) -> Result<MutationResult<S>, WritError> {
        let started = Instant::now();
        let mut tracker = ExecutionTracker::new(simulation);
        let intent = mutation.intent().clone();
        let context = mutation.context().clone();
        let notify = |stage: LifecycleStage,
                      failure: Option<&Failure>,
                      changes: Option<&ChangeSet>,
                      execution_id: Option<ExecutionId>| {
            if simulation {
                return;
            }
            self.observers.notify(&LifecycleEvent {
                stage,
                shape: S::SHAPE,
                state_id: &state_id,
                intent: &intent,
                context: &context,
                execution_id,
                changes,
                failure,
            });
        };
        let reject = |tracker: &mut ExecutionTracker,
                      failure: Failure,
                      validation: ValidationResult,
                      decisions: Vec<PolicyDecision>|
         -> Result<MutationResult<S>, WritError> {
            tracker.advance(failure.status())?;
            tracing::warn!(status = %tracker.status(), "{}", failure);
            if !simulation {
                self.stats.record_failure(intent.category(), failure.kind());
            }
            Ok(MutationResult::failed(
                failure,
                validation,
                decisions,
                self.clock.now(),
                started.elapsed(),
            ))
        };

        // Validation
        let mut validation = ValidationResult::ok();
        if self.options.always_validate || intent.requires_validation() {
            tracker.advance(ExecutionStatus::Validating)?;
            validation = mutation.validate(state);
            if !validation.is_valid() {
                let failure = Failure::Validation(validation.errors().to_vec());
                notify(LifecycleStage::Invalid, Some(&failure), None, None);
                return finish(reject(&mut tracker, failure, validation, Vec::new()), simulation);
            }
        }

        // Policies
        tracker.advance(ExecutionStatus::PolicyEvaluating)?;
        let policies = self.registry.policies::<S>();
        let verdict = evaluate_policies(&policies, mutation.operation(), state, &context);
        tracing::debug!(
            evaluated = verdict.decisions().len(),
            allowed = verdict.is_allowed(),
            "policies evaluated"
        );
        if !verdict.is_allowed() {
            let failure = Failure::PolicyDenied(verdict.denials());
            notify(LifecycleStage::Blocked, Some(&failure), None, None);
            return finish(
                reject(&mut tracker, failure, validation, verdict.into_decisions()),
                simulation,
            );
        }
        let decisions = verdict.into_decisions();

        // Executor
        notify(LifecycleStage::Before, None, None, None);
        tracker.advance(ExecutionStatus::Executing)?;
        let (new_state, changes) = match self.apply(Arc::clone(&mutation), state).await {
            Outcome::Applied(next, changes) => (next, changes),
            Outcome::Faulted(message) => {
                let failure = Failure::Fault(message);
                notify(LifecycleStage::Failed, Some(&failure), None, None);
                return finish(reject(&mut tracker, failure, validation, decisions), simulation);
            }
            Outcome::TimedOut(limit) => {
                let failure = Failure::Timeout {
                    limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                };
                notify(LifecycleStage::Failed, Some(&failure), None, None);
                return finish(reject(&mut tracker, failure, validation, decisions), simulation);
            }
        };

        if simulation {
            tracker.advance(ExecutionStatus::Completed)?;
            tracing::debug!(changes = changes.len(), "simulation completed");
            return Ok(MutationResult::succeeded(
                new_state,
                changes,
                validation,
                decisions,
                self.clock.now(),
                started.elapsed(),
            )
            .as_simulation());
        }

        // Recording
        tracker.advance(ExecutionStatus::Recording)?;
        let execution_id = ExecutionId(uuid::Uuid::new_v4().as_u128());
        let elapsed = started.elapsed();
        let entry = MutationHistoryEntry {
            execution_id,
            state_id: state_id.clone(),
            intent: intent.clone(),
            context: context.clone(),
            changes: changes.clone(),
            side_effects: mutation.side_effects(),
            timestamp: Timestamp(0),
            duration: elapsed,
            previous_state_hash: StateHash::of(state)?,
            new_state_hash: StateHash::of(&new_state)?,
        };
        let completed_at = match self.record(entry).await {
            Ok(at) => at,
            Err(WritError::StaleState {
                expected, found, ..
            }) => {
                let failure = Failure::StaleState { expected, found };
                notify(LifecycleStage::Failed, Some(&failure), None, None);
                return finish(reject(&mut tracker, failure, validation, decisions), simulation);
            }
            Err(e) => return Err(e),
        };
        tracker.advance(ExecutionStatus::Completed)?;

        notify(LifecycleStage::After, None, Some(&changes), Some(execution_id));
        tracing::info!(execution_id = %execution_id, changes = changes.len(), "mutation committed");

        Ok(MutationResult::succeeded(
            new_state,
            changes,
            validation,
            decisions,
            completed_at,
            elapsed,
        )
        .with_execution_id(execution_id))
    }

    /// Run `apply` on the blocking pool, racing the optional timeout.
    ///
    /// A timed-out task is abandoned, not stopped.
    async fn apply<S: DomainState>(&self, mutation: Arc<dyn Mutation<S>>, state: &S) -> Outcome<S> {
        let input = state.clone();
        let at = self.clock.now();
        let task =
            tokio::task::spawn_blocking(move || Executor::execute(mutation.as_ref(), &input, at));

        let joined = match self.options.execution_timeout() {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => return Outcome::TimedOut(limit),
            },
            None => task.await,
        };
        match joined {
            Ok(Ok((next, changes))) => Outcome::Applied(next, changes),
            Ok(Err(fault)) => Outcome::Faulted(fault.to_string()),
            Err(err) if err.is_panic() => {
                let payload = err.into_panic();
                Outcome::Faulted(format!(
                    "apply panicked: {}",
                    panic_payload_to_string(payload.as_ref())
                ))
            }
            Err(_) => Outcome::Faulted("apply task was cancelled".to_string()),
        }
    }

    /// Stamp and append `entry`, then count the commit.
    ///
    /// Runs on its own task so a dropped caller cannot interrupt it. The
    /// store rejects an entry that does not extend the id's chain with
    /// `WritError::StaleState`; nothing is counted then.
    async fn record(&self, mut entry: MutationHistoryEntry) -> Result<Timestamp, WritError> {
        let history = Arc::clone(&self.history);
        let stats = Arc::clone(&self.stats);
        let clock = Arc::clone(&self.clock);
        let last_stamp = Arc::clone(&self.last_stamp);

        let task = tokio::task::spawn_blocking(move || {
            let mut last = last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
            let stamp = clock.now().max(*last);
            entry.timestamp = stamp;
            let category = entry.intent.category().to_string();
            let duration = entry.duration;
            history.append(entry)?;
            *last = stamp;
            drop(last);
            stats.record_commit(&category, duration, stamp);
            Ok::<_, WritError>(stamp)
        });
        task.await
            .map_err(|e| WritError::Storage(format!("recording task failed: {}", e)))?
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub async fn history(&self, state_id: &StateId) -> Result<MutationHistory, WritError> {
        let history = Arc::clone(&self.history);
        let id = state_id.clone();
        tokio::task::spawn_blocking(move || history.history(&id))
            .await
            .map_err(|e| WritError::Storage(e.to_string()))?
    }

    pub async fn history_range(
        &self,
        state_id: &StateId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<MutationHistory, WritError> {
        let history = Arc::clone(&self.history);
        let id = state_id.clone();
        tokio::task::spawn_blocking(move || history.history_range(&id, from, to))
            .await
            .map_err(|e| WritError::Storage(e.to_string()))?
    }

    /// The most recent `count` entries, oldest first.
    pub async fn recent(
        &self,
        state_id: &StateId,
        count: usize,
    ) -> Result<Vec<MutationHistoryEntry>, WritError> {
        let history = Arc::clone(&self.history);
        let id = state_id.clone();
        tokio::task::spawn_blocking(move || history.recent(&id, count))
            .await
            .map_err(|e| WritError::Storage(e.to_string()))?
    }

    pub fn statistics(&self) -> MutationStatistics {
        self.stats.snapshot()
    }

    pub fn category_statistics(&self, category: &str) -> CategoryStatistics {
        self.stats.category(category)
    }
}

/// Log the terminal status of a rejected execution.
fn finish<S>(
    result: Result<MutationResult<S>, WritError>,
    simulation: bool,
) -> Result<MutationResult<S>, WritError> {
    if let Ok(r) = &result {
        tracing::debug!(status = %r.status, simulation, "execution finished");
    }
    result.map(|r| if simulation { r.as_simulation() } else { r })
}

// =============================================================================
// TESTS
// =============================================================================
