//! # Engine Configuration
//!
//! `MutationEngineOptions` with the three named presets, and the `writ.toml`
//! loader.
//!
//! ```toml
//! history_path = "audit/writ.redb"
//!
//! [engine]
//! preset = "strict"
//! execution_timeout_ms = 2000
//! max_concurrent_mutations = 4
//! ```
//!
//! Keys set explicitly in `[engine]` override the preset's values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use writ_core::WritError;
use writ_core::primitives::DEFAULT_MAX_CONCURRENT_MUTATIONS;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "writ.toml";

// =============================================================================
// PRESETS
// =============================================================================

/// Named option bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Default,
    /// Always validate, stop batches on first failure, detailed metrics.
    Strict,
    /// Validate only high-risk intents, no detailed metrics.
    Performance,
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Default => "default",
            Self::Strict => "strict",
            Self::Performance => "performance",
        };
        f.write_str(label)
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Runtime knobs of one `MutationEngine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationEngineOptions {
    /// Validate every mutation. When false, only intents with
    /// `requires_validation()` are validated.
    pub always_validate: bool,
    /// Wall-clock ceiling for `apply`, in milliseconds. `None` means no limit.
    pub execution_timeout_ms: Option<u64>,
    pub stop_batch_on_first_failure: bool,
    /// Per-category percentiles and failure counters.
    pub enable_detailed_metrics: bool,
    /// Process-wide ceiling on in-flight executions.
    pub max_concurrent_mutations: usize,
}

impl Default for MutationEngineOptions {
    fn default() -> Self {
        Self {
            always_validate: true,
            execution_timeout_ms: None,
            stop_batch_on_first_failure: true,
            enable_detailed_metrics: false,
            max_concurrent_mutations: DEFAULT_MAX_CONCURRENT_MUTATIONS,
        }
    }
}

impl MutationEngineOptions {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            always_validate: true,
            stop_batch_on_first_failure: true,
            enable_detailed_metrics: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn performance() -> Self {
        Self {
            always_validate: false,
            enable_detailed_metrics: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_preset(preset: Preset) -> Self {
        match preset {
            Preset::Default => Self::default(),
            Preset::Strict => Self::strict(),
            Preset::Performance => Self::performance(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_mutations = max;
        self
    }

    #[must_use]
    pub fn with_stop_on_first_failure(mut self, stop: bool) -> Self {
        self.stop_batch_on_first_failure = stop;
        self
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), WritError> {
        if self.max_concurrent_mutations == 0 {
            return Err(WritError::InvalidConfig(
                "max_concurrent_mutations must be at least 1".to_string(),
            ));
        }
        if self.execution_timeout_ms == Some(0) {
            return Err(WritError::InvalidConfig(
                "execution_timeout_ms must be positive (omit it for no limit)".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CONFIG FILE
// =============================================================================

/// `[engine]` as written in the file: a preset plus optional overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawEngine {
    preset: Preset,
    always_validate: Option<bool>,
    execution_timeout_ms: Option<u64>,
    stop_batch_on_first_failure: Option<bool>,
    enable_detailed_metrics: Option<bool>,
    max_concurrent_mutations: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    history_path: Option<PathBuf>,
    engine: RawEngine,
}

/// Resolved contents of a `writ.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EngineConfig {
    pub preset: Preset,
    pub options: MutationEngineOptions,
    /// Overrides the CLI's default database path when set.
    pub history_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, WritError> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| WritError::InvalidConfig(e.to_string()))?;
        let engine = raw.engine;

        let mut options = MutationEngineOptions::from_preset(engine.preset);
        if let Some(v) = engine.always_validate {
            options.always_validate = v;
        }
        if engine.execution_timeout_ms.is_some() {
            options.execution_timeout_ms = engine.execution_timeout_ms;
        }
        if let Some(v) = engine.stop_batch_on_first_failure {
            options.stop_batch_on_first_failure = v;
        }
        if let Some(v) = engine.enable_detailed_metrics {
            options.enable_detailed_metrics = v;
        }
        if let Some(v) = engine.max_concurrent_mutations {
            options.max_concurrent_mutations = v;
        }
        options.validate()?;

        Ok(Self {
            preset: engine.preset,
            options,
            history_path: raw.history_path,
        })
    }

    /// Load an explicitly named file. Missing or malformed files are errors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WritError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| WritError::Io(format!("Cannot read config {:?}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    /// Load `writ.toml` from the working directory if present.
    ///
    /// A broken default file is logged and ignored.
    pub fn discover() -> Self {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Ignoring config at {:?}: {}", path, err);
                Self::default()
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
