//! # Policies
//!
//! Named, prioritized admission rules evaluated before a mutation executes.
//!
//! ## Evaluation protocol
//!
//! - Policies for a state shape are evaluated in registry order: descending
//!   priority, ties in registration order.
//! - Every applicable policy is asked, even after a deny, so the caller sees
//!   every blocking reason at once.
//! - The aggregate verdict is deny if any policy denies.
//!
//! ## Registry
//!
//! `PolicyRegistry` is an explicit object owned by an engine instance. It
//! holds an exclusive lock only while a shape's list is being changed;
//! readers get a snapshot copy and are unaffected by later registrations.

use crate::mutation::DomainState;
use crate::{MutationContext, WritError};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

// =============================================================================
// DECISION
// =============================================================================

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    policy: String,
    allowed: bool,
    reason: Option<String>,
}

impl PolicyDecision {
    #[must_use]
    pub fn allow(policy: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            allowed: true,
            reason: None,
        }
    }

    /// A deny always carries a reason.
    #[must_use]
    pub fn deny(policy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.allowed, &self.reason) {
            (true, _) => write!(f, "{}: allow", self.policy),
            (false, Some(reason)) => write!(f, "{}: deny ({})", self.policy, reason),
            (false, None) => write!(f, "{}: deny", self.policy),
        }
    }
}

// =============================================================================
// POLICY TRAIT
// =============================================================================

/// An admission rule for state shape `S`.
///
/// Policies see the mutation only through its `S::Operation` tag. A policy
/// that does not care about a variant either returns `false` from
/// `applies_to` (it is then not asked at all) or allows it in `evaluate`.
pub trait Policy<S: DomainState>: Send + Sync {
    fn name(&self) -> &str;

    /// Higher runs first.
    fn priority(&self) -> i32 {
        0
    }

    fn applies_to(&self, _operation: &S::Operation) -> bool {
        true
    }

    fn evaluate(
        &self,
        operation: &S::Operation,
        state: &S,
        context: &MutationContext,
    ) -> PolicyDecision;
}

/// Aggregate of one evaluation round.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyVerdict {
    decisions: Vec<PolicyDecision>,
}

impl PolicyVerdict {
    /// Allowed unless some policy denied.
    pub fn is_allowed(&self) -> bool {
        self.decisions.iter().all(PolicyDecision::is_allowed)
    }

    /// Every decision, in evaluation order.
    pub fn decisions(&self) -> &[PolicyDecision] {
        &self.decisions
    }

    /// Only the denials, in evaluation order.
    pub fn denials(&self) -> Vec<PolicyDecision> {
        self.decisions
            .iter()
            .filter(|d| d.is_denied())
            .cloned()
            .collect()
    }

    pub fn into_decisions(self) -> Vec<PolicyDecision> {
        self.decisions
    }
}

/// Evaluate every applicable policy, in the order given. No short-circuit.
pub fn evaluate_policies<S: DomainState>(
    policies: &[Arc<dyn Policy<S>>],
    operation: &S::Operation,
    state: &S,
    context: &MutationContext,
) -> PolicyVerdict {
    let decisions = policies
        .iter()
        .filter(|policy| policy.applies_to(operation))
        .map(|policy| policy.evaluate(operation, state, context))
        .collect();
    PolicyVerdict { decisions }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Name and priority of a registered policy, for type-erased listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub name: String,
    pub priority: i32,
}

struct RegisteredPolicy {
    info: PolicyInfo,
    /// Always an `Arc<dyn Policy<S>>` for the shape's bound `S`.
    handle: Box<dyn Any + Send + Sync>,
}

struct ShapePolicies {
    type_id: TypeId,
    /// Kept sorted: descending priority, registration order on ties.
    entries: Vec<RegisteredPolicy>,
}

/// Thread-safe policy registry keyed by state shape.
#[derive(Default)]
pub struct PolicyRegistry {
    shapes: RwLock<BTreeMap<&'static str, ShapePolicies>>,
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shapes = self.shapes.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_map()
            .entries(shapes.iter().map(|(shape, list)| (shape, list.entries.len())))
            .finish()
    }
}

impl PolicyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a policy under `S::SHAPE`. Duplicate names are allowed.
    ///
    /// Fails with `ShapeConflict` if a different state type already owns the
    /// shape key.
    pub fn register<S: DomainState>(&self, policy: Arc<dyn Policy<S>>) -> Result<(), WritError> {
        let info = PolicyInfo {
            name: policy.name().to_string(),
            priority: policy.priority(),
        };
        let mut shapes = self.shapes.write().unwrap_or_else(PoisonError::into_inner);
        let list = shapes.entry(S::SHAPE).or_insert_with(|| ShapePolicies {
            type_id: TypeId::of::<S>(),
            entries: Vec::new(),
        });
        if list.type_id != TypeId::of::<S>() {
            return Err(WritError::ShapeConflict { shape: S::SHAPE });
        }

        // Insert after every entry with priority >= ours (stable on ties).
        let position = list
            .entries
            .iter()
            .position(|entry| entry.info.priority < info.priority)
            .unwrap_or(list.entries.len());
        list.entries.insert(
            position,
            RegisteredPolicy {
                info,
                handle: Box::new(policy),
            },
        );
        Ok(())
    }

    /// Remove every policy of `S::SHAPE` named `name`. Returns how many were removed.
    pub fn unregister<S: DomainState>(&self, name: &str) -> usize {
        let mut shapes = self.shapes.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = shapes.get_mut(S::SHAPE) else {
            return 0;
        };
        if list.type_id != TypeId::of::<S>() {
            return 0;
        }
        let before = list.entries.len();
        list.entries.retain(|entry| entry.info.name != name);
        before - list.entries.len()
    }

    /// Snapshot of the shape's policies in evaluation order.
    pub fn policies<S: DomainState>(&self) -> Vec<Arc<dyn Policy<S>>> {
        let shapes = self.shapes.read().unwrap_or_else(PoisonError::into_inner);
        shapes
            .get(S::SHAPE)
            .filter(|list| list.type_id == TypeId::of::<S>())
            .map(|list| {
                list.entries
                    .iter()
                    .filter_map(|entry| entry.handle.downcast_ref::<Arc<dyn Policy<S>>>())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First policy of the shape named `name`, in evaluation order.
    pub fn policy<S: DomainState>(&self, name: &str) -> Option<Arc<dyn Policy<S>>> {
        self.policies::<S>()
            .into_iter()
            .find(|policy| policy.name() == name)
    }

    /// Type-erased listing of a shape's policies, in evaluation order.
    pub fn policy_infos(&self, shape: &str) -> Vec<PolicyInfo> {
        let shapes = self.shapes.read().unwrap_or_else(PoisonError::into_inner);
        shapes
            .get(shape)
            .map(|list| list.entries.iter().map(|e| e.info.clone()).collect())
            .unwrap_or_default()
    }

    /// Every shape with at least one registration ever made.
    pub fn shapes(&self) -> Vec<&'static str> {
        let shapes = self.shapes.read().unwrap_or_else(PoisonError::into_inner);
        shapes.keys().copied().collect()
    }

    /// Total number of registered policies across shapes.
    pub fn len(&self) -> usize {
        let shapes = self.shapes.read().unwrap_or_else(PoisonError::into_inner);
        shapes.values().map(|list| list.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Counter, CounterOp};
    use crate::StateId;
    use serde::Serialize;

    struct Fixed {
        name: &'static str,
        priority: i32,
        allow: bool,
    }

    impl Policy<Counter> for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn evaluate(&self, _: &CounterOp, _: &Counter, _: &MutationContext) -> PolicyDecision {
            if self.allow {
                PolicyDecision::allow(self.name)
            } else {
                PolicyDecision::deny(self.name, "fixed deny")
            }
        }
    }

    /// Only inspects `Add`; silent on everything else.
    struct AddOnly;

    impl Policy<Counter> for AddOnly {
        fn name(&self) -> &str {
            "AddOnly"
        }

        fn applies_to(&self, operation: &CounterOp) -> bool {
            matches!(operation, CounterOp::Add(_))
        }

        fn evaluate(&self, _: &CounterOp, _: &Counter, _: &MutationContext) -> PolicyDecision {
            PolicyDecision::deny("AddOnly", "no adds")
        }
    }

    fn fixed(name: &'static str, priority: i32, allow: bool) -> Arc<dyn Policy<Counter>> {
        Arc::new(Fixed {
            name,
            priority,
            allow,
        })
    }

    fn names(registry: &PolicyRegistry) -> Vec<String> {
        registry
            .policies::<Counter>()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    #[test]
    fn sorted_by_descending_priority_stable_on_ties() {
        let registry = PolicyRegistry::new();
        registry.register(fixed("low", 10, true)).expect("register");
        registry.register(fixed("high-a", 100, true)).expect("register");
        registry.register(fixed("mid", 50, true)).expect("register");
        registry.register(fixed("high-b", 100, true)).expect("register");

        assert_eq!(names(&registry), vec!["high-a", "high-b", "mid", "low"]);
    }

    #[test]
    fn duplicates_are_kept_and_unregister_removes_all() {
        let registry = PolicyRegistry::new();
        registry.register(fixed("dup", 1, true)).expect("register");
        registry.register(fixed("dup", 2, false)).expect("register");
        registry.register(fixed("other", 0, true)).expect("register");
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.unregister::<Counter>("dup"), 2);
        assert_eq!(names(&registry), vec!["other"]);
        assert_eq!(registry.unregister::<Counter>("missing"), 0);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_registration() {
        let registry = PolicyRegistry::new();
        registry.register(fixed("first", 0, true)).expect("register");
        let snapshot = registry.policies::<Counter>();

        registry.register(fixed("second", 0, true)).expect("register");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.policies::<Counter>().len(), 2);
    }

    #[test]
    fn lookup_by_name() {
        let registry = PolicyRegistry::new();
        registry.register(fixed("a", 0, true)).expect("register");
        assert!(registry.policy::<Counter>("a").is_some());
        assert!(registry.policy::<Counter>("b").is_none());
        assert_eq!(
            registry.policy_infos("Counter"),
            vec![PolicyInfo {
                name: "a".to_string(),
                priority: 0
            }]
        );
        assert_eq!(registry.shapes(), vec!["Counter"]);
    }

    #[test]
    fn evaluation_reports_every_denial_in_order() {
        let policies = vec![
            fixed("p100", 100, false),
            fixed("p75", 75, true),
            fixed("p50", 50, false),
        ];
        let verdict = evaluate_policies(
            &policies,
            &CounterOp::Add(1),
            &Counter::new("c", 0),
            &MutationContext::new("tester"),
        );

        assert!(!verdict.is_allowed());
        assert_eq!(verdict.decisions().len(), 3);
        let denied: Vec<_> = verdict.denials().iter().map(|d| d.policy().to_string()).collect();
        assert_eq!(denied, vec!["p100", "p50"]);
        assert_eq!(verdict.denials()[0].reason(), Some("fixed deny"));
    }

    #[test]
    fn non_applicable_policies_are_not_asked() {
        let policies: Vec<Arc<dyn Policy<Counter>>> = vec![Arc::new(AddOnly)];
        let ctx = MutationContext::new("tester");
        let state = Counter::new("c", 0);

        let add = evaluate_policies(&policies, &CounterOp::Add(1), &state, &ctx);
        let fail = evaluate_policies(&policies, &CounterOp::Fail("x".into()), &state, &ctx);

        assert!(!add.is_allowed());
        assert!(fail.is_allowed());
        assert!(fail.decisions().is_empty());
    }

    #[test]
    fn shape_conflict_is_rejected() {
        #[derive(Clone, Serialize)]
        struct Impostor;

        impl DomainState for Impostor {
            type Operation = ();
            const SHAPE: &'static str = "Counter";

            fn state_id(&self) -> StateId {
                StateId::new("impostor")
            }
        }

        struct Nop;

        impl Policy<Impostor> for Nop {
            fn name(&self) -> &str {
                "nop"
            }

            fn evaluate(&self, _: &(), _: &Impostor, _: &MutationContext) -> PolicyDecision {
                PolicyDecision::allow("nop")
            }
        }

        assert_eq!(Impostor.state_id(), StateId::new("impostor"));

        let registry = PolicyRegistry::new();
        registry.register(fixed("a", 0, true)).expect("register");
        let err = registry
            .register::<Impostor>(Arc::new(Nop))
            .expect_err("conflict");
        assert!(matches!(err, WritError::ShapeConflict { shape: "Counter" }));
        assert!(registry.policies::<Impostor>().is_empty());
    }

    #[test]
    fn decision_display() {
        assert_eq!(PolicyDecision::allow("a").to_string(), "a: allow");
        assert_eq!(PolicyDecision::deny("b", "why").to_string(), "b: deny (why)");
    }
}
