//! # Mutation Intent
//!
//! The static description of *what* a mutation type does. Authored once per
//! mutation type and never changed afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Risk classification, ordered `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Static descriptor of a mutation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationIntent {
    operation: String,
    category: String,
    risk: RiskLevel,
    tags: BTreeSet<String>,
    description: String,
}

impl MutationIntent {
    /// A low-risk intent with no tags.
    #[must_use]
    pub fn new(operation: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            category: category.into(),
            risk: RiskLevel::Low,
            tags: BTreeSet::new(),
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn risk(&self) -> RiskLevel {
        self.risk
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// High and Critical mutations are always validated, whatever the engine
    /// options say.
    pub fn requires_validation(&self) -> bool {
        self.risk >= RiskLevel::High
    }
}
