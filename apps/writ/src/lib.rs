//! # writ
//!
//! The async mutation engine built on `writ-core`.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    apps/writ (THE ENGINE)                │
//! │                                                          │
//! │  ┌──────────┐   ┌────────────────┐   ┌───────────────┐   │
//! │  │  config  │──▶│ MutationEngine │──▶│   observers   │   │
//! │  │  (toml)  │   │ (tokio)        │   │ (best-effort) │   │
//! │  └──────────┘   └───────┬────────┘   └───────────────┘   │
//! │                         ▼                                │
//! │                 ┌───────────────┐                        │
//! │                 │   writ-core   │                        │
//! │                 │  (THE LOGIC)  │                        │
//! │                 └───────────────┘                        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! `domains` holds two small reference domains (user quotas, feature flags)
//! used by the CLI demos and the integration tests.

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod domains;
pub mod engine;
pub mod observer;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use config::{EngineConfig, MutationEngineOptions, Preset};
pub use engine::{MutationEngine, MutationEngineBuilder};
pub use observer::{
    LifecycleEvent, LifecycleStage, MutationObserver, ObserverError, TracingObserver,
};
