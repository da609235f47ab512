//! Per-user quotas.
//!
//! Paths look like `UserQuotas.<user>`. Increases are capped by `MaxQuota`,
//! decreases below zero are refused by validation and by
//! `PreventNegativeQuota`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use writ_core::{
    ChangeRecorder, DomainState, Mutation, MutationContext, MutationFault, MutationIntent,
    Policy, PolicyDecision, RiskLevel, StateId, ValidationResult,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaState {
    pub id: String,
    pub user_quotas: BTreeMap<String, i64>,
}

impl QuotaState {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_quotas: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_quota(mut self, user: impl Into<String>, quota: i64) -> Self {
        self.user_quotas.insert(user.into(), quota);
        self
    }

    /// Current quota; users without an entry have zero.
    pub fn quota(&self, user: &str) -> i64 {
        self.user_quotas.get(user).copied().unwrap_or(0)
    }
}

impl DomainState for QuotaState {
    type Operation = QuotaOp;
    const SHAPE: &'static str = "QuotaState";

    fn state_id(&self) -> StateId {
        StateId::new(self.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaOp {
    Increase { user: String, amount: i64 },
    Decrease { user: String, amount: i64 },
}

fn path(user: &str) -> String {
    format!("UserQuotas.{}", user)
}

// =============================================================================
// MUTATION
// =============================================================================

pub struct QuotaMutation {
    op: QuotaOp,
    intent: MutationIntent,
    context: MutationContext,
}

impl QuotaMutation {
    #[must_use]
    pub fn increase(user: impl Into<String>, amount: i64, context: MutationContext) -> Self {
        Self {
            op: QuotaOp::Increase {
                user: user.into(),
                amount,
            },
            intent: MutationIntent::new("IncreaseQuota", "quota")
                .with_risk(RiskLevel::Medium)
                .with_description("Raise a user's quota"),
            context,
        }
    }

    #[must_use]
    pub fn decrease(user: impl Into<String>, amount: i64, context: MutationContext) -> Self {
        Self {
            op: QuotaOp::Decrease {
                user: user.into(),
                amount,
            },
            intent: MutationIntent::new("DecreaseQuota", "quota")
                .with_risk(RiskLevel::Low)
                .with_description("Lower a user's quota"),
            context,
        }
    }
}

impl Mutation<QuotaState> for QuotaMutation {
    fn intent(&self) -> &MutationIntent {
        &self.intent
    }

    fn context(&self) -> &MutationContext {
        &self.context
    }

    fn operation(&self) -> &QuotaOp {
        &self.op
    }

    fn validate(&self, state: &QuotaState) -> ValidationResult {
        let (user, amount) = match &self.op {
            QuotaOp::Increase { user, amount } | QuotaOp::Decrease { user, amount } => {
                (user, *amount)
            }
        };
        let mut result = ValidationResult::ok();
        if user.is_empty() {
            result = result.with_error("UserQuotas", "user must not be empty");
        }
        if amount <= 0 {
            result = result.with_error(
                path(user),
                format!("amount must be positive, got {}", amount),
            );
        }
        if let QuotaOp::Decrease { .. } = self.op {
            let current = state.quota(user);
            if amount > current {
                result = result.with_error(
                    path(user),
                    format!("decrease of {} exceeds current quota {}", amount, current),
                );
            }
        }
        result
    }

    fn apply(
        &self,
        state: &QuotaState,
        changes: &mut ChangeRecorder,
    ) -> Result<QuotaState, MutationFault> {
        let (user, delta) = match &self.op {
            QuotaOp::Increase { user, amount } => (user, *amount),
            QuotaOp::Decrease { user, amount } => (user, amount.saturating_neg()),
        };
        let mut next = state.clone();
        match state.user_quotas.get(user) {
            Some(current) => {
                let updated = current.saturating_add(delta);
                changes.modified(path(user), *current, updated)?;
                next.user_quotas.insert(user.clone(), updated);
            }
            None => {
                changes.added(path(user), delta)?;
                next.user_quotas.insert(user.clone(), delta);
            }
        }
        Ok(next)
    }
}

// =============================================================================
// POLICIES
// =============================================================================

/// Denies increases that would push a quota above `max`.
#[derive(Debug, Clone)]
pub struct MaxQuota {
    max: i64,
}

impl MaxQuota {
    #[must_use]
    pub fn new(max: i64) -> Self {
        Self { max }
    }
}

impl Policy<QuotaState> for MaxQuota {
    fn name(&self) -> &str {
        "MaxQuota"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn applies_to(&self, operation: &QuotaOp) -> bool {
        matches!(operation, QuotaOp::Increase { .. })
    }

    fn evaluate(
        &self,
        operation: &QuotaOp,
        state: &QuotaState,
        _ctx: &MutationContext,
    ) -> PolicyDecision {
        let QuotaOp::Increase { user, amount } = operation else {
            return PolicyDecision::allow(self.name());
        };
        let current = state.quota(user);
        if current.saturating_add(*amount) > self.max {
            return PolicyDecision::deny(
                self.name(),
                format!(
                    "current quota {} plus increase {} exceeds maximum {}",
                    current, amount, self.max
                ),
            );
        }
        PolicyDecision::allow(self.name())
    }
}

/// Denies decreases that would drive a quota negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreventNegativeQuota;

impl Policy<QuotaState> for PreventNegativeQuota {
    fn name(&self) -> &str {
        "PreventNegativeQuota"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn applies_to(&self, operation: &QuotaOp) -> bool {
        matches!(operation, QuotaOp::Decrease { .. })
    }

    fn evaluate(
        &self,
        operation: &QuotaOp,
        state: &QuotaState,
        _ctx: &MutationContext,
    ) -> PolicyDecision {
        let QuotaOp::Decrease { user, amount } = operation else {
            return PolicyDecision::allow(self.name());
        };
        let current = state.quota(user);
        if current.saturating_sub(*amount) < 0 {
            return PolicyDecision::deny(
                self.name(),
                format!("decrease of {} would drive quota {} negative", amount, current),
            );
        }
        PolicyDecision::allow(self.name())
    }
}
