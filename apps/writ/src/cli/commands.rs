//! # CLI Command Implementations

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use writ::domains::{
    CriticalFlagApproval, FeatureFlagState, FlagMutation, MaxQuota, PreventNegativeQuota,
    QuotaMutation, QuotaState,
};
use writ::domains::flags::APPROVED_BY;
use writ::{EngineConfig, MutationEngine, TracingObserver};
use writ_core::{
    BatchMutationResult, HistoryStore, MutationContext, MutationHistory, MutationHistoryEntry,
    MutationResult, RedbHistory, StateId, Timestamp, WritError, export_history, import_history,
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for import (500 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

fn validate_file_size(path: &Path, max_size: u64) -> Result<(), WritError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| WritError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(WritError::Corrupted(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path, refusing anything that is not a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, WritError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| WritError::Io(format!("Invalid file path '{}': {}", path.display(), e)))?;

    if !canonical.is_file() {
        return Err(WritError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

/// Resolve an output path against its canonical parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, WritError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let canonical_parent = parent.canonicalize().map_err(|e| {
        WritError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(WritError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| WritError::Io("Output path has no filename".to_string()))?;
    Ok(canonical_parent.join(filename))
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn micros(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

// =============================================================================
// DEMO COMMAND
// =============================================================================

/// Collects one line (or JSON object) per demo step.
struct Report {
    json_mode: bool,
    steps: Vec<serde_json::Value>,
}

impl Report {
    fn new(json_mode: bool) -> Self {
        Self {
            json_mode,
            steps: Vec::new(),
        }
    }

    fn step<S>(&mut self, label: &str, result: &MutationResult<S>) {
        let changes: Vec<serde_json::Value> = result
            .changes
            .changes()
            .iter()
            .map(|c| {
                json!({
                    "path": c.path(),
                    "kind": format!("{:?}", c.kind()),
                    "old": c.old_value().map(ToString::to_string),
                    "new": c.new_value().map(ToString::to_string),
                })
            })
            .collect();
        let failure = result.failure.as_ref().map(ToString::to_string);

        if !self.json_mode {
            println!("{:<40} {}", label, result.status);
            for change in result.changes.changes() {
                let old = change.old_value().map(ToString::to_string).unwrap_or_default();
                let new = change.new_value().map(ToString::to_string).unwrap_or_default();
                println!("    {:?} {}: {} -> {}", change.kind(), change.path(), old, new);
            }
            if let Some(reason) = &failure {
                println!("    {}", reason);
            }
        }

        self.steps.push(json!({
            "step": label,
            "status": result.status.to_string(),
            "execution_id": result.execution_id.map(|id| id.to_string()),
            "changes": changes,
            "failure": failure,
            "elapsed_us": micros(result.elapsed),
        }));
    }

    fn batch<S>(&mut self, label: &str, batch: &BatchMutationResult<S>) {
        for (i, result) in batch.results.iter().enumerate() {
            self.step(&format!("{} [{}]", label, i + 1), result);
        }
        if !self.json_mode {
            println!(
                "{:<40} {} ok, {} failed, {} skipped, {} changes",
                label,
                batch.success_count,
                batch.failure_count,
                batch.skipped_count,
                batch.changes.len()
            );
        }
    }

    fn finish(self, state_id: &StateId, recorded: usize) {
        if self.json_mode {
            print_json(&json!({
                "state_id": state_id.as_str(),
                "recorded_entries": recorded,
                "steps": self.steps,
            }));
            return;
        }
        println!();
        println!("{} entries recorded under '{}'", recorded, state_id);
        println!("Inspect with: writ history --state-id {}", state_id);
    }
}

fn demo_engine(db_path: &Path, config: &EngineConfig) -> Result<MutationEngine, WritError> {
    let history = Arc::new(RedbHistory::open(db_path)?);
    MutationEngine::builder()
        .options(config.options.clone())
        .history(history)
        .observer(Arc::new(TracingObserver))
        .build()
}

/// Each demo starts from a freshly built state, which would be stale
/// against the head left by an earlier run, so every run gets its own id.
fn demo_state_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

/// Run a reference domain against the audit database.
pub async fn cmd_demo(
    db_path: &Path,
    config: &EngineConfig,
    json_mode: bool,
    domain: super::Demo,
) -> Result<(), WritError> {
    let engine = demo_engine(db_path, config)?;
    tracing::info!(preset = %config.preset, database = ?db_path, "demo engine ready");

    match domain {
        super::Demo::Quota => demo_quota(&engine, json_mode).await,
        super::Demo::Flags => demo_flags(&engine, json_mode).await,
    }
}

async fn demo_quota(engine: &MutationEngine, json_mode: bool) -> Result<(), WritError> {
    engine.register_policy(MaxQuota::new(100))?;
    engine.register_policy(PreventNegativeQuota)?;

    let id = demo_state_id("quota");
    let mut state = QuotaState::new(id.clone())
        .with_quota("alice", 50)
        .with_quota("bob", 95);
    let ops = || MutationContext::new("ops").with_reason("quota demo");
    let mut report = Report::new(json_mode);

    let result = engine
        .execute(QuotaMutation::increase("alice", 15, ops()), &state)
        .await?;
    report.step("increase alice by 15", &result);
    if let Some(next) = result.new_state {
        state = next;
    }

    let result = engine
        .execute(QuotaMutation::increase("bob", 10, ops()), &state)
        .await?;
    report.step("increase bob by 10", &result);

    let result = engine
        .execute(QuotaMutation::decrease("alice", 90, ops()), &state)
        .await?;
    report.step("decrease alice by 90", &result);

    let batch = engine
        .execute_batch(
            vec![
                QuotaMutation::increase("carol", 20, ops()),
                QuotaMutation::decrease("carol", 50, ops()),
                QuotaMutation::decrease("alice", 5, ops()),
            ],
            state,
        )
        .await?;
    report.batch("batch", &batch);

    let state_id = StateId::new(id);
    let recorded = engine.history(&state_id).await?.len();
    report.finish(&state_id, recorded);
    Ok(())
}

async fn demo_flags(engine: &MutationEngine, json_mode: bool) -> Result<(), WritError> {
    engine.register_policy(CriticalFlagApproval::new(["NewCheckout"], 2))?;

    let id = demo_state_id("flags");
    let mut state = FeatureFlagState::new(id.clone())
        .with_flag("NewCheckout", true)
        .with_flag("DarkMode", false);
    let mut report = Report::new(json_mode);

    let attempts = [
        ("disable NewCheckout, no approvals", None),
        ("disable NewCheckout, self-approved", Some("erin,dave")),
        ("disable NewCheckout, two approvals", Some("carol,dave")),
    ];
    for (label, approvals) in attempts {
        let mut ctx = MutationContext::new("erin").with_reason("checkout incident");
        if let Some(list) = approvals {
            ctx = ctx.with_metadata(APPROVED_BY, list);
        }
        let result = engine
            .execute(FlagMutation::disable("NewCheckout", ctx), &state)
            .await?;
        report.step(label, &result);
        if let Some(next) = result.new_state {
            state = next;
        }
    }

    let result = engine
        .execute(FlagMutation::enable("DarkMode", MutationContext::new("erin")), &state)
        .await?;
    report.step("enable DarkMode", &result);

    let state_id = StateId::new(id);
    let recorded = engine.history(&state_id).await?.len();
    report.finish(&state_id, recorded);
    Ok(())
}

// =============================================================================
// HISTORY COMMAND
// =============================================================================

fn entry_json(entry: &MutationHistoryEntry) -> serde_json::Value {
    json!({
        "execution_id": entry.execution_id.to_string(),
        "timestamp": entry.timestamp.millis(),
        "operation": entry.intent.operation(),
        "category": entry.intent.category(),
        "risk": entry.intent.risk().to_string(),
        "actor": entry.context.actor_id(),
        "reason": entry.context.reason(),
        "changes": entry.changes.paths().collect::<Vec<_>>(),
        "side_effects": entry.side_effects,
        "duration_us": micros(entry.duration),
        "previous_state_hash": entry.previous_state_hash.to_hex(),
        "new_state_hash": entry.new_state_hash.to_hex(),
    })
}

/// Print the recorded history of a state id.
pub fn cmd_history(
    db_path: &Path,
    json_mode: bool,
    state_id: &str,
    recent: Option<usize>,
    range: Option<(u64, u64)>,
) -> Result<(), WritError> {
    let store = RedbHistory::open(db_path)?;
    let id = StateId::new(state_id);
    let entries = match (recent, range) {
        (Some(count), _) => store.recent(&id, count)?,
        (None, Some((from, to))) => store
            .history_range(&id, Timestamp(from), Timestamp(to))?
            .into_entries(),
        (None, None) => store.history(&id)?.into_entries(),
    };

    if json_mode {
        let rows: Vec<serde_json::Value> = entries.iter().map(entry_json).collect();
        print_json(&json!({ "state_id": state_id, "entries": rows }));
        return Ok(());
    }

    if entries.is_empty() {
        println!("No history for '{}'", state_id);
        return Ok(());
    }
    println!("History of '{}' ({} entries)", state_id, entries.len());
    println!("==================");
    for entry in &entries {
        println!(
            "{:>15}  {:<16} {:<10} by {:<8} {} change(s)",
            entry.timestamp,
            entry.intent.operation(),
            entry.intent.category(),
            entry.context.actor_id(),
            entry.changes.len()
        );
        for path in entry.changes.paths() {
            println!("{:>17}{}", "", path);
        }
    }
    Ok(())
}

// =============================================================================
// VERIFY COMMAND
// =============================================================================

/// Audit the hash chain. Any issue is reported as corruption.
pub fn cmd_verify(db_path: &Path, json_mode: bool, state_id: &str) -> Result<(), WritError> {
    let store = RedbHistory::open(db_path)?;
    let history: MutationHistory = store.history(&StateId::new(state_id))?;
    let issues = history.verify_chain();

    if json_mode {
        print_json(&json!({
            "state_id": state_id,
            "entries": history.len(),
            "intact": issues.is_empty(),
            "issues": issues.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }));
    } else if issues.is_empty() {
        println!("'{}': {} entries, chain intact", state_id, history.len());
        if let Some(last) = history.last() {
            println!("Head hash: {}", last.new_state_hash);
        }
    } else {
        for issue in &issues {
            println!("  {}", issue);
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(WritError::Corrupted(format!(
            "{} integrity issue(s) in history of '{}'",
            issues.len(),
            state_id
        )))
    }
}

// =============================================================================
// STATS COMMAND
// =============================================================================

/// Summarize the history of a state id.
pub fn cmd_stats(db_path: &Path, json_mode: bool, state_id: &str) -> Result<(), WritError> {
    let store = RedbHistory::open(db_path)?;
    let stats = store.history(&StateId::new(state_id))?.statistics();

    if json_mode {
        print_json(&json!({
            "state_id": state_id,
            "total_entries": stats.total_entries,
            "distinct_actors": stats.distinct_actors,
            "by_category": stats.by_category,
            "total_changes": stats.total_changes,
            "mean_changes_milli": stats.mean_changes_milli,
            "first_at": stats.first_at.map(Timestamp::millis),
            "last_at": stats.last_at.map(Timestamp::millis),
        }));
        return Ok(());
    }

    println!("Statistics for '{}'", state_id);
    println!("==================");
    println!("Entries:          {}", stats.total_entries);
    println!("Distinct actors:  {}", stats.distinct_actors);
    println!("Total changes:    {}", stats.total_changes);
    println!(
        "Mean changes:     {}.{:03}",
        stats.mean_changes_milli / 1000,
        stats.mean_changes_milli % 1000
    );
    for (category, count) in &stats.by_category {
        println!("  {:<16} {}", category, count);
    }
    if let (Some(first), Some(last)) = (stats.first_at, stats.last_at) {
        println!("Span:             {} .. {}", first, last);
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT COMMANDS
// =============================================================================

/// Export the whole store in canonical format.
pub fn cmd_export(db_path: &Path, output: &Path) -> Result<(), WritError> {
    let validated_output = validate_output_path(output)?;
    let store = RedbHistory::open(db_path)?;
    let data = export_history(&store)?;

    std::fs::write(&validated_output, &data)
        .map_err(|e| WritError::Io(format!("Write file: {}", e)))?;

    println!(
        "Exported {} entries ({} bytes) to {:?}",
        store.entry_count()?,
        data.len(),
        validated_output
    );
    Ok(())
}

/// Restore a canonical export into the database.
pub fn cmd_import(db_path: &Path, input: &Path) -> Result<(), WritError> {
    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;

    let data = std::fs::read(&validated_path)
        .map_err(|e| WritError::Io(format!("Read file: {}", e)))?;
    let archive = import_history(&data)?;

    let store = RedbHistory::open(db_path)?;
    let restored = archive.restore_into(&store)?;
    println!(
        "Imported {} entries across {} state id(s)",
        restored,
        archive.state_ids().len()
    );
    Ok(())
}

// =============================================================================
// CONFIG COMMAND
// =============================================================================

/// Print the effective engine options.
pub fn cmd_config(config: &EngineConfig, db_path: &Path, json_mode: bool) -> Result<(), WritError> {
    if json_mode {
        print_json(&json!({
            "preset": config.preset,
            "options": config.options,
            "database": db_path.to_string_lossy(),
        }));
        return Ok(());
    }

    let options = &config.options;
    println!("Engine Configuration");
    println!("==================");
    println!("Preset:                      {}", config.preset);
    println!("always_validate:             {}", options.always_validate);
    match options.execution_timeout_ms {
        Some(ms) => println!("execution_timeout_ms:        {}", ms),
        None => println!("execution_timeout_ms:        none"),
    }
    println!("stop_batch_on_first_failure: {}", options.stop_batch_on_first_failure);
    println!("enable_detailed_metrics:     {}", options.enable_detailed_metrics);
    println!("max_concurrent_mutations:    {}", options.max_concurrent_mutations);
    println!("Database:                    {:?}", db_path);
    Ok(())
}
