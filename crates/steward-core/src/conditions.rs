//! # Condition Store
//!
//! Reconcile-scoped, insertion-ordered map of conditions keyed by type.
//!
//! Each entry carries an `ObservabilityPolicy` that says how a transition of
//! that condition should surface as events and logs. Policies are never
//! persisted: conditions loaded from the previous status start silent.
//!
//! `set` keeps the previous `last_transition_time` when `(status, reason)`
//! is unchanged, so a message-only edit never churns timestamps. The
//! comparison also covers the persisted condition: a reconcile that rewrites
//! a condition more than once and lands back on the persisted pair keeps the
//! persisted timestamp.

use crate::observability::ObservabilityPolicy;
use crate::types::{CONDITION_READY, Condition, ConditionStatus, Status};
use chrono::{DateTime, Utc};

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, Clone)]
struct Entry {
    condition: Condition,
    policy: ObservabilityPolicy,
}

/// Ordered condition map for a single reconcile.
#[derive(Debug, Clone)]
pub struct ConditionStore {
    now: DateTime<Utc>,
    entries: Vec<Entry>,
    persisted: Vec<Condition>,
}

impl ConditionStore {
    /// Seed the store with the persisted conditions. `now` stamps every transition.
    #[must_use]
    pub fn new(existing: &[Condition], now: DateTime<Utc>) -> Self {
        let mut store = Self {
            now,
            entries: Vec::with_capacity(existing.len()),
            persisted: existing.to_vec(),
        };
        for condition in existing {
            match store.position(&condition.condition_type) {
                Some(idx) => store.entries[idx].condition = condition.clone(),
                None => store.entries.push(Entry {
                    condition: condition.clone(),
                    policy: ObservabilityPolicy::silent(),
                }),
            }
        }
        store
    }

    /// The reconcile timestamp.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn position(&self, condition_type: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.condition.condition_type == condition_type)
    }

    /// Upsert a condition by type.
    pub fn set(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        policy: ObservabilityPolicy,
    ) {
        let mut condition = Condition::new(condition_type, status, reason, message, self.now);
        let same_pair = |c: &Condition| c.status == status && c.reason == reason;
        let kept = self
            .get(condition_type)
            .filter(|c| same_pair(*c))
            .or_else(|| self.persisted(condition_type).filter(|c| same_pair(*c)))
            .map(|c| c.last_transition_time);
        if let Some(since) = kept {
            condition.last_transition_time = since;
        }
        match self.position(condition_type) {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                entry.condition = condition;
                entry.policy = policy;
            }
            None => self.entries.push(Entry { condition, policy }),
        }
    }

    /// The condition as it was persisted before this reconcile.
    #[must_use]
    pub fn persisted(&self, condition_type: &str) -> Option<&Condition> {
        self.persisted
            .iter()
            .rev()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn mark_true(&mut self, condition_type: &str, reason: &str, message: &str, policy: ObservabilityPolicy) {
        self.set(condition_type, ConditionStatus::True, reason, message, policy);
    }

    pub fn mark_false(&mut self, condition_type: &str, reason: &str, message: &str, policy: ObservabilityPolicy) {
        self.set(condition_type, ConditionStatus::False, reason, message, policy);
    }

    pub fn mark_unknown(&mut self, condition_type: &str, reason: &str, message: &str, policy: ObservabilityPolicy) {
        self.set(condition_type, ConditionStatus::Unknown, reason, message, policy);
    }

    #[must_use]
    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.position(condition_type)
            .map(|idx| &self.entries[idx].condition)
    }

    /// Remove a condition. Returns the removed record.
    pub fn delete(&mut self, condition_type: &str) -> Option<Condition> {
        self.position(condition_type)
            .map(|idx| self.entries.remove(idx).condition)
    }

    /// Policy attached to a condition; silent if unknown or not re-set this reconcile.
    #[must_use]
    pub fn policy_for(&self, condition_type: &str) -> ObservabilityPolicy {
        self.position(condition_type)
            .map(|idx| self.entries[idx].policy.clone())
            .unwrap_or_default()
    }

    /// True if every named condition exists and is `True`.
    #[must_use]
    pub fn all_true(&self, types: &[&str]) -> bool {
        types
            .iter()
            .all(|t| self.get(t).is_some_and(Condition::is_true))
    }

    /// True if any named condition is `True`.
    #[must_use]
    pub fn any_true(&self, types: &[&str]) -> bool {
        types
            .iter()
            .any(|t| self.get(t).is_some_and(Condition::is_true))
    }

    /// True if any named condition is `False`.
    #[must_use]
    pub fn any_false(&self, types: &[&str]) -> bool {
        types
            .iter()
            .any(|t| self.get(t).is_some_and(Condition::is_false))
    }

    /// Conditions in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Condition> {
        self.entries.iter().map(|e| e.condition.clone()).collect()
    }

    /// Iterate conditions with their policies.
    pub fn iter(&self) -> impl Iterator<Item = (&Condition, &ObservabilityPolicy)> {
        self.entries.iter().map(|e| (&e.condition, &e.policy))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// A condition that appeared or changed `(status, reason)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionTransition {
    pub previous: Option<Condition>,
    pub current: Condition,
}

/// Additions and `(status, reason)` changes from `old` to `new`, in `new` order.
///
/// Removals are not reported.
#[must_use]
pub fn diff_transitions(old: &[Condition], new: &[Condition]) -> Vec<ConditionTransition> {
    new.iter()
        .filter_map(|current| {
            let previous = old
                .iter()
                .find(|c| c.condition_type == current.condition_type);
            match previous {
                Some(prev) if prev.status == current.status && prev.reason == current.reason => None,
                _ => Some(ConditionTransition {
                    previous: previous.cloned(),
                    current: current.clone(),
                }),
            }
        })
        .collect()
}

// =============================================================================
// STATUS HELPER
// =============================================================================

/// Conventional condition types written by `StatusHelper`.
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_DEGRADED: &str = "Degraded";

/// Sets the `Ready`/`Progressing`/`Degraded` triple for hand-written status logic.
///
/// Returns the status value the caller should store alongside the conditions.
#[derive(Debug)]
pub struct StatusHelper<'a> {
    store: &'a mut ConditionStore,
}

impl<'a> StatusHelper<'a> {
    #[must_use]
    pub fn new(store: &'a mut ConditionStore) -> Self {
        Self { store }
    }

    pub fn ready(&mut self, reason: &str, message: &str) -> Status {
        self.store.mark_true(CONDITION_READY, reason, message, ObservabilityPolicy::info());
        self.store.mark_false(CONDITION_PROGRESSING, reason, message, ObservabilityPolicy::silent());
        self.store.mark_false(CONDITION_DEGRADED, reason, message, ObservabilityPolicy::silent());
        Status::Ready
    }

    pub fn progressing(&mut self, reason: &str, message: &str) -> Status {
        self.store.mark_false(CONDITION_READY, reason, message, ObservabilityPolicy::silent());
        self.store.mark_true(CONDITION_PROGRESSING, reason, message, ObservabilityPolicy::info());
        self.store.mark_false(CONDITION_DEGRADED, reason, message, ObservabilityPolicy::silent());
        Status::Progressing
    }

    pub fn degraded(&mut self, reason: &str, message: &str) -> Status {
        self.store.mark_false(CONDITION_READY, reason, message, ObservabilityPolicy::silent());
        self.store.mark_false(CONDITION_PROGRESSING, reason, message, ObservabilityPolicy::silent());
        self.store.mark_true(CONDITION_DEGRADED, reason, message, ObservabilityPolicy::error());
        Status::Degraded
    }

    pub fn failed(&mut self, reason: &str, message: &str) -> Status {
        self.store.mark_false(CONDITION_READY, reason, message, ObservabilityPolicy::error());
        self.store.mark_false(CONDITION_PROGRESSING, reason, message, ObservabilityPolicy::silent());
        self.store.mark_true(CONDITION_DEGRADED, reason, message, ObservabilityPolicy::silent());
        Status::Failed
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp")
    }

    #[test]
    fn set_inserts_in_order() {
        let mut store = ConditionStore::new(&[], t0());
        store.mark_true("B", "Ok", "", ObservabilityPolicy::silent());
        store.mark_true("A", "Ok", "", ObservabilityPolicy::silent());
        let types: Vec<_> = store.snapshot().into_iter().map(|c| c.condition_type).collect();
        assert_eq!(types, vec!["B", "A"]);
    }

    #[test]
    fn message_only_edit_keeps_transition_time() {
        let old = Condition::new("Ready", ConditionStatus::True, "Ok", "first", t0());
        let later = t0() + TimeDelta::seconds(30);
        let mut store = ConditionStore::new(&[old], later);
        store.mark_true("Ready", "Ok", "second", ObservabilityPolicy::silent());
        let got = store.get("Ready").expect("ready");
        assert_eq!(got.message, "second");
        assert_eq!(got.last_transition_time, t0());
    }

    #[test]
    fn reason_change_moves_transition_time() {
        let old = Condition::new("Ready", ConditionStatus::False, "A", "", t0());
        let later = t0() + TimeDelta::seconds(30);
        let mut store = ConditionStore::new(&[old], later);
        store.mark_false("Ready", "B", "", ObservabilityPolicy::silent());
        assert_eq!(store.get("Ready").expect("ready").last_transition_time, later);
    }

    #[test]
    fn returning_to_persisted_pair_keeps_transition_time() {
        let old = Condition::new("Reachable", ConditionStatus::False, "ApplyFailed", "", t0());
        let later = t0() + TimeDelta::seconds(30);
        let mut store = ConditionStore::new(&[old], later);

        store.mark_true("Reachable", "Reachable", "", ObservabilityPolicy::silent());
        assert_eq!(store.get("Reachable").expect("flipped").last_transition_time, later);
        store.mark_false("Reachable", "ApplyFailed", "again", ObservabilityPolicy::silent());

        let got = store.get("Reachable").expect("reachable");
        assert_eq!(got.last_transition_time, t0());
        assert_eq!(store.persisted("Reachable").map(|c| c.reason.as_str()), Some("ApplyFailed"));
    }

    #[test]
    fn loaded_conditions_are_silent() {
        let old = Condition::new("Ready", ConditionStatus::True, "Ok", "", t0());
        let store = ConditionStore::new(&[old], t0());
        assert_eq!(store.policy_for("Ready"), ObservabilityPolicy::silent());
        assert_eq!(store.policy_for("Missing"), ObservabilityPolicy::silent());
    }

    #[test]
    fn predicates() {
        let mut store = ConditionStore::new(&[], t0());
        store.mark_true("A", "Ok", "", ObservabilityPolicy::silent());
        store.mark_false("B", "Bad", "", ObservabilityPolicy::silent());
        assert!(store.all_true(&["A"]));
        assert!(!store.all_true(&["A", "B"]));
        assert!(!store.all_true(&["A", "C"]));
        assert!(store.any_true(&["A", "B"]));
        assert!(store.any_false(&["A", "B"]));
        assert!(!store.any_false(&["A", "C"]));
    }

    #[test]
    fn delete_removes() {
        let mut store = ConditionStore::new(&[], t0());
        store.mark_true("A", "Ok", "", ObservabilityPolicy::silent());
        assert!(store.delete("A").is_some());
        assert!(store.get("A").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn diff_reports_additions_and_changes_only() {
        let old = vec![
            Condition::new("Same", ConditionStatus::True, "Ok", "a", t0()),
            Condition::new("Changed", ConditionStatus::True, "Ok", "", t0()),
            Condition::new("Removed", ConditionStatus::True, "Ok", "", t0()),
        ];
        let new = vec![
            Condition::new("Same", ConditionStatus::True, "Ok", "b", t0()),
            Condition::new("Changed", ConditionStatus::False, "Bad", "", t0()),
            Condition::new("Added", ConditionStatus::True, "Ok", "", t0()),
        ];
        let diff = diff_transitions(&old, &new);
        let types: Vec<_> = diff.iter().map(|t| t.current.condition_type.as_str()).collect();
        assert_eq!(types, vec!["Changed", "Added"]);
        assert!(diff[0].previous.is_some());
        assert!(diff[1].previous.is_none());
    }

    #[test]
    fn status_helper_sets_triple() {
        let mut store = ConditionStore::new(&[], t0());
        let status = StatusHelper::new(&mut store).degraded("Broken", "it broke");
        assert_eq!(status, Status::Degraded);
        assert!(store.any_false(&[CONDITION_READY]));
        assert!(store.all_true(&[CONDITION_DEGRADED]));
        assert_eq!(store.len(), 3);
    }
}
