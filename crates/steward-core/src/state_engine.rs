//! # State Engine
//!
//! Turns the component health reports of one reconcile into conditions,
//! an overall status, and a proceed/block/retry decision.
//!
//! ## Phases
//!
//! 1. Categorize every error and compute the global flags.
//! 2. `DependenciesReachable` from retriable errors.
//! 3. One `{component}Ready` condition per component (grace period applies).
//! 4. `AuthValid` and `ConfigValid`.
//! 5. Overall status and the aggregate `Ready` condition.
//! 6. The decision.
//!
//! The condition store is mutated in place through phases 2 to 5; it is
//! reconcile-scoped and never shared.

use crate::conditions::ConditionStore;
use crate::grace::{GracePeriod, elapsed_since};
use crate::health::ComponentHealth;
use crate::observability::ObservabilityPolicy;
use crate::taxonomy::{CategorizedError, ErrorCategory, InfrastructureError, categorize};
use crate::types::{
    CONDITION_AUTH_VALID, CONDITION_CONFIG_VALID, CONDITION_DEPENDENCIES_REACHABLE, CONDITION_READY,
    Condition, ConditionStatus, DependencyType, Status,
};
use std::time::Duration;

// =============================================================================
// REASONS
// =============================================================================

pub const REASON_ALL_COMPONENTS_READY: &str = "AllComponentsReady";
pub const REASON_AUTH_ERROR: &str = "AuthError";
pub const REASON_AUTHENTICATION_VALID: &str = "AuthenticationValid";
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";
pub const REASON_MISSING_REF: &str = "MissingRef";
pub const REASON_CONFIGURATION_VALID: &str = "ConfigurationValid";
pub const REASON_INFRASTRUCTURE_ERROR: &str = "InfrastructureError";
pub const REASON_UNCLASSIFIED_ERROR: &str = "UnclassifiedError";
pub const REASON_UNCLASSIFIED_PERSISTENT: &str = "UnclassifiedErrorPersistent";
pub const REASON_REACHABLE: &str = "Reachable";

// =============================================================================
// DECISION
// =============================================================================

/// What the pipeline should do after status derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDecision {
    /// False when auth, invalid-spec or missing-upstream errors are present.
    pub should_apply: bool,
    /// True when retriable errors are present and not escalated.
    pub should_requeue: bool,
    /// Returned from the reconcile to trigger backoff.
    pub requeue_error: Option<InfrastructureError>,
    pub status: Status,
    /// Unclassified failures outlived the escalation window.
    pub escalated: bool,
}

impl StateDecision {
    /// Decision for reconcilers that compute their own status.
    #[must_use]
    pub fn manual(status: Status) -> Self {
        Self {
            should_apply: true,
            should_requeue: false,
            requeue_error: None,
            status,
            escalated: false,
        }
    }
}

// =============================================================================
// FLAGS
// =============================================================================

#[derive(Debug, Default)]
struct Flags<'a> {
    first_infra: Option<&'a CategorizedError>,
    first_unknown: Option<&'a CategorizedError>,
    first_auth: Option<&'a CategorizedError>,
    first_invalid: Option<&'a CategorizedError>,
    first_missing_upstream: Option<&'a CategorizedError>,
    blocking: bool,
    retriable: Vec<CategorizedError>,
}

impl<'a> Flags<'a> {
    fn collect(errors: impl Iterator<Item = &'a CategorizedError>) -> Self {
        let mut flags = Self::default();
        for err in errors {
            flags.blocking |= err.category.blocks_apply();
            let slot = match err.category {
                ErrorCategory::Infrastructure => &mut flags.first_infra,
                ErrorCategory::Unknown => &mut flags.first_unknown,
                ErrorCategory::Auth => &mut flags.first_auth,
                ErrorCategory::InvalidSpec => &mut flags.first_invalid,
                ErrorCategory::MissingUpstreamDependency => &mut flags.first_missing_upstream,
                ErrorCategory::MissingDownstreamDependency => continue,
            };
            slot.get_or_insert(err);
            if err.category.is_retriable() {
                flags.retriable.push(err.clone());
            }
        }
        flags
    }

    fn has_infra(&self) -> bool {
        self.first_infra.is_some()
    }

    fn has_retriable(&self) -> bool {
        !self.retriable.is_empty()
    }

    fn blocks_apply(&self) -> bool {
        self.blocking
    }
}

/// Per-component result of phase 3.
#[derive(Debug, Clone)]
struct ComponentEval {
    status: Status,
    reason: String,
    message: String,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Derives status from component health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateEngine {
    grace: GracePeriod,
    unknown_escalation: Option<Duration>,
}

impl Default for StateEngine {
    fn default() -> Self {
        Self::new(GracePeriod::default(), None)
    }
}

impl StateEngine {
    #[must_use]
    pub const fn new(grace: GracePeriod, unknown_escalation: Option<Duration>) -> Self {
        Self {
            grace,
            unknown_escalation,
        }
    }

    /// Run all phases against `store` and return the decision.
    pub fn evaluate(&self, health: &[ComponentHealth], store: &mut ConditionStore) -> StateDecision {
        let categorized: Vec<Vec<CategorizedError>> = health
            .iter()
            .map(|h| h.errors.iter().map(categorize).collect())
            .collect();
        let flags = Flags::collect(categorized.iter().flatten());

        let escalated = self.update_reachability(&flags, store);

        let evals: Vec<ComponentEval> = health
            .iter()
            .zip(&categorized)
            .map(|(h, errors)| self.evaluate_component(h, errors, store))
            .collect();

        update_aggregates(&flags, store);

        let status = derive_overall(&flags, &evals, store);

        let should_requeue = flags.has_infra() || (flags.has_retriable() && !escalated);
        let decision = StateDecision {
            should_apply: !flags.blocks_apply(),
            should_requeue,
            requeue_error: should_requeue.then(|| InfrastructureError::new(flags.retriable.clone())),
            status,
            escalated,
        };
        tracing::debug!(
            status = %decision.status,
            should_apply = decision.should_apply,
            should_requeue = decision.should_requeue,
            components = health.len(),
            "state derived"
        );
        decision
    }

    /// Phase 2. Returns true when unclassified failures are escalated.
    fn update_reachability(&self, flags: &Flags<'_>, store: &mut ConditionStore) -> bool {
        let failing = flags.first_infra.or(flags.first_unknown);
        let Some(first) = failing else {
            if store.get(CONDITION_DEPENDENCIES_REACHABLE).is_some() {
                store.mark_true(
                    CONDITION_DEPENDENCIES_REACHABLE,
                    REASON_REACHABLE,
                    "All dependencies are reachable",
                    ObservabilityPolicy::info(),
                );
            }
            return false;
        };

        let prior = store.get(CONDITION_DEPENDENCIES_REACHABLE);
        let (reason, escalated) = if flags.has_infra() {
            (REASON_INFRASTRUCTURE_ERROR, false)
        } else if self.unclassified_persisted(prior, store) {
            if prior.is_some_and(|c| c.reason == REASON_UNCLASSIFIED_ERROR) {
                tracing::warn!(
                    reason = %first.reason,
                    "unclassified failure persisted past escalation window; engine retries stopped"
                );
            }
            (REASON_UNCLASSIFIED_PERSISTENT, true)
        } else {
            (REASON_UNCLASSIFIED_ERROR, false)
        };

        store.mark_false(
            CONDITION_DEPENDENCIES_REACHABLE,
            reason,
            &first.user_message,
            ObservabilityPolicy::error(),
        );
        escalated
    }

    fn unclassified_persisted(&self, prior: Option<&Condition>, store: &ConditionStore) -> bool {
        let (Some(window), Some(prior)) = (self.unknown_escalation, prior) else {
            return false;
        };
        if !prior.is_false() {
            return false;
        }
        match prior.reason.as_str() {
            REASON_UNCLASSIFIED_PERSISTENT => true,
            REASON_UNCLASSIFIED_ERROR => elapsed_since(prior.last_transition_time, store.now()) >= window,
            _ => false,
        }
    }

    /// Phase 3 for a single component.
    fn evaluate_component(
        &self,
        health: &ComponentHealth,
        errors: &[CategorizedError],
        store: &mut ConditionStore,
    ) -> ComponentEval {
        let condition_type = health.condition_type();

        if health.state.is_none() {
            let prior = store.get(&condition_type);
            let reachable = store.get(CONDITION_DEPENDENCIES_REACHABLE);
            if self.grace.should_preserve(errors, prior, reachable, store.now()) {
                if let Some(prior) = prior {
                    tracing::debug!(
                        component = %health.component,
                        "holding previous condition during grace period"
                    );
                    let status = if prior.is_true() {
                        Status::Ready
                    } else {
                        fallback_status(health.dependency_type)
                    };
                    return ComponentEval {
                        status,
                        reason: prior.reason.clone(),
                        message: prior.message.clone(),
                    };
                }
            }
        }

        let eval = derive_component(health, errors);
        let condition_status = if eval.status.is_ready() {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        let policy = if eval.status.is_error() {
            ObservabilityPolicy::error()
        } else {
            ObservabilityPolicy::info()
        };
        store.set(&condition_type, condition_status, &eval.reason, &eval.message, policy);
        eval
    }
}

/// Status of a not-ready component without an explicit state.
const fn fallback_status(dependency: DependencyType) -> Status {
    match dependency {
        DependencyType::Upstream => Status::Pending,
        DependencyType::Downstream | DependencyType::Unspecified => Status::Progressing,
    }
}

fn derive_component(health: &ComponentHealth, errors: &[CategorizedError]) -> ComponentEval {
    if let Some(state) = health.state {
        return ComponentEval {
            status: state,
            reason: health.reason.clone().unwrap_or_else(|| state.as_str().to_string()),
            message: health
                .message
                .clone()
                .unwrap_or_else(|| format!("{} is {}", health.component, state)),
        };
    }

    let blocking = errors
        .iter()
        .find(|e| e.category != ErrorCategory::MissingDownstreamDependency);
    if let Some(err) = blocking {
        return ComponentEval {
            status: Status::Degraded,
            reason: err.reason.clone(),
            message: err.user_message.clone(),
        };
    }

    if let Some(err) = errors.first() {
        return ComponentEval {
            status: fallback_status(health.dependency_type),
            reason: err.reason.clone(),
            message: err.user_message.clone(),
        };
    }

    ComponentEval {
        status: Status::Ready,
        reason: health.reason.clone().unwrap_or_else(|| "Ready".to_string()),
        message: health
            .message
            .clone()
            .unwrap_or_else(|| format!("{} is ready", health.component)),
    }
}

/// Phase 4.
fn update_aggregates(flags: &Flags<'_>, store: &mut ConditionStore) {
    if let Some(err) = flags.first_auth {
        store.mark_false(CONDITION_AUTH_VALID, REASON_AUTH_ERROR, &err.user_message, ObservabilityPolicy::error());
    } else if store.get(CONDITION_AUTH_VALID).is_some() {
        store.mark_true(
            CONDITION_AUTH_VALID,
            REASON_AUTHENTICATION_VALID,
            "Authentication is valid",
            ObservabilityPolicy::info(),
        );
    }

    let config_failure = flags
        .first_invalid
        .map(|e| (REASON_INVALID_SPEC, e))
        .or_else(|| flags.first_missing_upstream.map(|e| (REASON_MISSING_REF, e)));
    if let Some((reason, err)) = config_failure {
        store.mark_false(CONDITION_CONFIG_VALID, reason, &err.user_message, ObservabilityPolicy::error());
    } else if store.get(CONDITION_CONFIG_VALID).is_some() {
        store.mark_true(
            CONDITION_CONFIG_VALID,
            REASON_CONFIGURATION_VALID,
            "Configuration is valid",
            ObservabilityPolicy::info(),
        );
    }
}

/// Phase 5.
fn derive_overall(flags: &Flags<'_>, evals: &[ComponentEval], store: &mut ConditionStore) -> Status {
    for gate in [CONDITION_AUTH_VALID, CONDITION_CONFIG_VALID] {
        let failed = store.get(gate).filter(|c| c.is_false()).cloned();
        if let Some(cond) = failed {
            store.mark_false(CONDITION_READY, &cond.reason, &cond.message, ObservabilityPolicy::error());
            return Status::Failed;
        }
    }

    let mut worst = Status::Ready;
    let mut cause: Option<&ComponentEval> = None;
    let mut progress: Option<&ComponentEval> = None;
    for eval in evals.iter().filter(|e| !e.status.is_ready()) {
        worst = worst.worst(eval.status);
        if eval.status.is_error() {
            cause.get_or_insert(eval);
        } else {
            progress.get_or_insert(eval);
        }
    }

    if flags.has_retriable() && !worst.is_ready() {
        worst = worst.degrade();
    }

    if worst.is_ready() {
        store.mark_true(
            CONDITION_READY,
            REASON_ALL_COMPONENTS_READY,
            "All components are ready",
            ObservabilityPolicy::info(),
        );
        return Status::Ready;
    }

    let policy = if cause.is_some() || worst.is_error() {
        ObservabilityPolicy::error()
    } else {
        ObservabilityPolicy::info()
    };
    match cause.or(progress) {
        Some(source) => store.mark_false(CONDITION_READY, &source.reason, &source.message, policy),
        None => store.mark_false(CONDITION_READY, "NotReady", "Not all components are ready", policy),
    }
    worst
}

// =============================================================================
// TESTS
// =============================================================================
