//! Feature flags.
//!
//! Paths look like `FeatureFlags.<flag>`. Toggling a critical flag needs
//! sign-off from other people, listed in the `approvedBy` metadata entry of
//! the context as a comma-separated string.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use writ_core::{
    ChangeRecorder, DomainState, Mutation, MutationContext, MutationFault, MutationIntent,
    Policy, PolicyDecision, RiskLevel, StateId, ValidationResult,
};

/// Metadata key carrying the approver list.
pub const APPROVED_BY: &str = "approvedBy";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureFlagState {
    pub id: String,
    pub flags: BTreeMap<String, bool>,
}

impl FeatureFlagState {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flags: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_flag(mut self, flag: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(flag.into(), enabled);
        self
    }

    /// Unknown flags are off.
    pub fn is_enabled(&self, flag: &str) -> bool {
        self.flags.get(flag).copied().unwrap_or(false)
    }
}

impl DomainState for FeatureFlagState {
    type Operation = FlagOp;
    const SHAPE: &'static str = "FeatureFlagState";

    fn state_id(&self) -> StateId {
        StateId::new(self.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagOp {
    Enable { flag: String },
    Disable { flag: String },
}

impl FlagOp {
    pub fn flag(&self) -> &str {
        match self {
            Self::Enable { flag } | Self::Disable { flag } => flag,
        }
    }

    fn target(&self) -> bool {
        matches!(self, Self::Enable { .. })
    }
}

pub struct FlagMutation {
    op: FlagOp,
    intent: MutationIntent,
    context: MutationContext,
}

impl FlagMutation {
    #[must_use]
    pub fn enable(flag: impl Into<String>, context: MutationContext) -> Self {
        Self {
            op: FlagOp::Enable { flag: flag.into() },
            intent: MutationIntent::new("EnableFeature", "feature_flags")
                .with_risk(RiskLevel::Medium)
                .with_tag("rollout"),
            context,
        }
    }

    /// Disabling is treated as high risk, so it is always validated.
    #[must_use]
    pub fn disable(flag: impl Into<String>, context: MutationContext) -> Self {
        Self {
            op: FlagOp::Disable { flag: flag.into() },
            intent: MutationIntent::new("DisableFeature", "feature_flags")
                .with_risk(RiskLevel::High)
                .with_tag("rollback"),
            context,
        }
    }
}

impl Mutation<FeatureFlagState> for FlagMutation {
    fn intent(&self) -> &MutationIntent {
        &self.intent
    }

    fn context(&self) -> &MutationContext {
        &self.context
    }

    fn operation(&self) -> &FlagOp {
        &self.op
    }

    fn validate(&self, _state: &FeatureFlagState) -> ValidationResult {
        let flag = self.op.flag();
        if flag.is_empty() || flag.contains('.') {
            return ValidationResult::fail(
                "FeatureFlags",
                format!("invalid flag name {:?}", flag),
            );
        }
        ValidationResult::ok()
    }

    fn apply(
        &self,
        state: &FeatureFlagState,
        changes: &mut ChangeRecorder,
    ) -> Result<FeatureFlagState, MutationFault> {
        let flag = self.op.flag();
        let target = self.op.target();
        let path = format!("FeatureFlags.{}", flag);
        let mut next = state.clone();
        match state.flags.get(flag) {
            Some(current) if *current == target => {}
            Some(current) => changes.modified(path, *current, target)?,
            None => changes.added(path, target)?,
        }
        next.flags.insert(flag.to_string(), target);
        Ok(next)
    }

    fn side_effects(&self) -> Vec<String> {
        vec![format!("flag-cache.invalidate:{}", self.op.flag())]
    }
}

// =============================================================================
// POLICIES
// =============================================================================

/// Toggling a critical flag needs `required` distinct approvers, none of
/// whom may be the actor.
#[derive(Debug, Clone)]
pub struct CriticalFlagApproval {
    critical: BTreeSet<String>,
    required: usize,
}

impl CriticalFlagApproval {
    #[must_use]
    pub fn new<I, T>(critical: I, required: usize) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            critical: critical.into_iter().map(Into::into).collect(),
            required,
        }
    }
}

impl Policy<FeatureFlagState> for CriticalFlagApproval {
    fn name(&self) -> &str {
        "CriticalFlagApproval"
    }

    fn priority(&self) -> i32 {
        200
    }

    fn applies_to(&self, operation: &FlagOp) -> bool {
        self.critical.contains(operation.flag())
    }

    fn evaluate(
        &self,
        operation: &FlagOp,
        _state: &FeatureFlagState,
        ctx: &MutationContext,
    ) -> PolicyDecision {
        let approvers: BTreeSet<&str> = ctx
            .metadata_list(APPROVED_BY)
            .into_iter()
            .filter(|approver| *approver != ctx.actor_id())
            .collect();
        if approvers.len() < self.required {
            return PolicyDecision::deny(
                self.name(),
                format!(
                    "critical flag '{}' needs {} approvers other than '{}', got {}",
                    operation.flag(),
                    self.required,
                    ctx.actor_id(),
                    approvers.len()
                ),
            );
        }
        PolicyDecision::allow(self.name())
    }
}
