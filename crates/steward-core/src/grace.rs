//! # Grace-Period Debouncer
//!
//! Holds a component's previous condition while a transient infrastructure
//! failure is younger than the grace window. The age of the failure is the
//! age of `DependenciesReachable=False`, whose transition time only moves
//! when its reason changes.

use crate::taxonomy::CategorizedError;
use crate::types::Condition;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default debounce window.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Age of `since` at `now`. Clock skew into the future reads as zero.
#[must_use]
pub fn elapsed_since(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriod {
    window: Duration,
}

impl Default for GracePeriod {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl GracePeriod {
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self { window }
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// True while `reachable` is False and younger than the window.
    #[must_use]
    pub fn within(&self, reachable: Option<&Condition>, now: DateTime<Utc>) -> bool {
        match reachable {
            Some(cond) if cond.is_false() => elapsed_since(cond.last_transition_time, now) < self.window,
            _ => false,
        }
    }

    /// Whether a component's prior condition should be kept instead of recomputed.
    ///
    /// Requires retriable-only errors, a prior condition to keep, and an
    /// unreachable signal still inside the window.
    #[must_use]
    pub fn should_preserve(
        &self,
        errors: &[CategorizedError],
        prior: Option<&Condition>,
        reachable: Option<&Condition>,
        now: DateTime<Utc>,
    ) -> bool {
        !errors.is_empty()
            && errors.iter().all(|e| e.category.is_retriable())
            && prior.is_some()
            && self.within(reachable, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConditionStatus;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp")
    }

    fn unreachable_since(at: DateTime<Utc>) -> Condition {
        Condition::new("DependenciesReachable", ConditionStatus::False, "InfrastructureError", "", at)
    }

    #[test]
    fn window_boundaries() {
        let grace = GracePeriod::default();
        let cond = unreachable_since(t0());
        assert!(grace.within(Some(&cond), t0()));
        assert!(grace.within(Some(&cond), t0() + TimeDelta::seconds(9)));
        assert!(!grace.within(Some(&cond), t0() + TimeDelta::seconds(10)));
        assert!(!grace.within(None, t0()));
    }

    #[test]
    fn reachable_true_is_never_within() {
        let cond = Condition::new("DependenciesReachable", ConditionStatus::True, "Reachable", "", t0());
        assert!(!GracePeriod::default().within(Some(&cond), t0()));
    }

    #[test]
    fn preserve_requires_retriable_only_errors() {
        let grace = GracePeriod::default();
        let prior = Condition::new("ModelReady", ConditionStatus::True, "Ready", "", t0());
        let reach = unreachable_since(t0());
        let infra = vec![CategorizedError::infrastructure("Timeout", "t")];
        let mixed = vec![
            CategorizedError::infrastructure("Timeout", "t"),
            CategorizedError::auth("Forbidden", "f"),
        ];
        assert!(grace.should_preserve(&infra, Some(&prior), Some(&reach), t0()));
        assert!(!grace.should_preserve(&mixed, Some(&prior), Some(&reach), t0()));
        assert!(!grace.should_preserve(&infra, None, Some(&reach), t0()));
        assert!(!grace.should_preserve(&[], Some(&prior), Some(&reach), t0()));
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        let later = t0() + TimeDelta::seconds(60);
        assert_eq!(elapsed_since(later, t0()), Duration::ZERO);
    }
}
