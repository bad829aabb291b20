//! # Observability Policies
//!
//! How a condition surfaces outside the status field.
//!
//! - `ObservabilityPolicy` is attached to a condition when it is set.
//! - `EventRecorder` is the sink for cluster events.
//! - `emit_observability` turns the final condition set plus its transitions
//!   into events and `tracing` log lines.
//!
//! Default policy is silent: no events, no logs.

use crate::conditions::{ConditionStore, ConditionTransition};
use crate::types::{Condition, ObjectRef};
use std::sync::Mutex;

// =============================================================================
// POLICY
// =============================================================================

/// When an event or log line is produced for a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitMode {
    #[default]
    None,
    /// Only when `(status, reason)` changed in this reconcile.
    OnTransition,
    /// Every reconcile, transition or not.
    Always,
}

impl EmitMode {
    const fn upgraded(self) -> Self {
        match self {
            Self::OnTransition => Self::Always,
            other => other,
        }
    }

    const fn fires(self, transitioned: bool) -> bool {
        match self {
            Self::None => false,
            Self::OnTransition => transitioned,
            Self::Always => true,
        }
    }
}

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventLevel {
    #[default]
    Normal,
    Warning,
}

/// `tracing` level a condition log line is written at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

/// Event and log behavior of one condition for one reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservabilityPolicy {
    pub event_mode: EmitMode,
    pub event_level: EventLevel,
    pub log_mode: EmitMode,
    pub log_level: LogLevel,
    pub reason_override: Option<String>,
    pub message_override: Option<String>,
}

impl ObservabilityPolicy {
    /// No events, no logs.
    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }

    /// Normal event and info log, on transition.
    #[must_use]
    pub fn info() -> Self {
        Self::silent().with_normal_event().with_info_log()
    }

    /// Warning event and error log, every reconcile.
    #[must_use]
    pub fn error() -> Self {
        Self::silent()
            .with_warning_event()
            .with_error_log()
            .recurring()
    }

    /// Debug log on transition, no event.
    #[must_use]
    pub fn debug() -> Self {
        Self::silent().with_debug_log()
    }

    /// Record a Normal event on transition.
    #[must_use]
    pub fn with_normal_event(mut self) -> Self {
        self.event_mode = EmitMode::OnTransition;
        self.event_level = EventLevel::Normal;
        self
    }

    /// Record a Warning event on transition.
    #[must_use]
    pub fn with_warning_event(mut self) -> Self {
        self.event_mode = EmitMode::OnTransition;
        self.event_level = EventLevel::Warning;
        self
    }

    /// Log on transition at `level`.
    #[must_use]
    pub fn with_log(mut self, level: LogLevel) -> Self {
        self.log_mode = EmitMode::OnTransition;
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn with_error_log(self) -> Self {
        self.with_log(LogLevel::Error)
    }

    #[must_use]
    pub fn with_info_log(self) -> Self {
        self.with_log(LogLevel::Info)
    }

    #[must_use]
    pub fn with_debug_log(self) -> Self {
        self.with_log(LogLevel::Debug)
    }

    /// Upgrade enabled on-transition modes to every reconcile.
    #[must_use]
    pub fn recurring(mut self) -> Self {
        self.event_mode = self.event_mode.upgraded();
        self.log_mode = self.log_mode.upgraded();
        self
    }

    /// Replace the event reason.
    #[must_use]
    pub fn with_event_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason_override = Some(reason.into());
        self
    }

    /// Replace the event message.
    #[must_use]
    pub fn with_event_message(mut self, message: impl Into<String>) -> Self {
        self.message_override = Some(message.into());
        self
    }

    /// Event reason for `condition`: override, or `Type + Reason`.
    #[must_use]
    pub fn event_reason(&self, condition: &Condition) -> String {
        self.reason_override
            .clone()
            .unwrap_or_else(|| format!("{}{}", condition.condition_type, condition.reason))
    }

    /// Event message for `condition`: override, condition message, or a generated line.
    #[must_use]
    pub fn event_message(&self, condition: &Condition) -> String {
        if let Some(message) = &self.message_override {
            return message.clone();
        }
        if !condition.message.is_empty() {
            return condition.message.clone();
        }
        format!(
            "Condition {} is {} (reason={})",
            condition.condition_type, condition.status, condition.reason
        )
    }
}

// =============================================================================
// EVENT SINK
// =============================================================================

/// Sink for events about a managed resource.
pub trait EventRecorder: Send + Sync {
    fn record(&self, object: &ObjectRef, level: EventLevel, reason: &str, message: &str);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl EventRecorder for NullRecorder {
    fn record(&self, _object: &ObjectRef, _level: EventLevel, _reason: &str, _message: &str) {}
}

/// An event captured by `MemoryRecorder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: ObjectRef,
    pub level: EventLevel,
    pub reason: String,
    pub message: String,
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Drain recorded events.
    pub fn take(&self) -> Vec<RecordedEvent> {
        match self.events.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, object: &ObjectRef, level: EventLevel, reason: &str, message: &str) {
        let event = RecordedEvent {
            object: object.clone(),
            level,
            reason: reason.to_string(),
            message: message.to_string(),
        };
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

// =============================================================================
// EMISSION
// =============================================================================

/// Emit events and logs for the final condition set.
///
/// A condition fires when its mode is `OnTransition` and it is in `transitions`,
/// or when its mode is `Always`. Returns the number of events recorded.
pub fn emit_observability(
    recorder: &dyn EventRecorder,
    object: &ObjectRef,
    store: &ConditionStore,
    transitions: &[ConditionTransition],
) -> usize {
    let mut recorded = 0;
    for (condition, policy) in store.iter() {
        let transitioned = transitions
            .iter()
            .any(|t| t.current.condition_type == condition.condition_type);

        if policy.event_mode.fires(transitioned) {
            recorder.record(
                object,
                policy.event_level,
                &policy.event_reason(condition),
                &policy.event_message(condition),
            );
            recorded += 1;
        }

        if policy.log_mode.fires(transitioned) {
            log_condition(object, condition, policy.log_level, transitioned);
        }
    }
    recorded
}

fn log_condition(object: &ObjectRef, condition: &Condition, level: LogLevel, transitioned: bool) {
    let condition_type = condition.condition_type.as_str();
    let status = condition.status.as_str();
    let reason = condition.reason.as_str();
    let message = condition.message.as_str();
    match level {
        LogLevel::Error => tracing::error!(resource = %object, condition = condition_type, status, reason, transitioned, "{message}"),
        LogLevel::Warning => tracing::warn!(resource = %object, condition = condition_type, status, reason, transitioned, "{message}"),
        LogLevel::Info => tracing::info!(resource = %object, condition = condition_type, status, reason, transitioned, "{message}"),
        LogLevel::Debug => tracing::debug!(resource = %object, condition = condition_type, status, reason, transitioned, "{message}"),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::diff_transitions;
    use crate::types::{ConditionStatus, GroupVersionKind};
    use chrono::{DateTime, Utc};

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp")
    }

    fn object() -> ObjectRef {
        ObjectRef::new(GroupVersionKind::new("steward.dev", "v1", "Service"), "ns", "svc")
    }

    #[test]
    fn presets() {
        let info = ObservabilityPolicy::info();
        assert_eq!(info.event_mode, EmitMode::OnTransition);
        assert_eq!(info.event_level, EventLevel::Normal);
        assert_eq!(info.log_mode, EmitMode::OnTransition);

        let error = ObservabilityPolicy::error();
        assert_eq!(error.event_mode, EmitMode::Always);
        assert_eq!(error.event_level, EventLevel::Warning);
        assert_eq!(error.log_mode, EmitMode::Always);
        assert_eq!(error.log_level, LogLevel::Error);

        let debug = ObservabilityPolicy::debug();
        assert_eq!(debug.event_mode, EmitMode::None);
        assert_eq!(debug.log_level, LogLevel::Debug);
    }

    #[test]
    fn recurring_leaves_none_alone() {
        let policy = ObservabilityPolicy::silent().with_info_log().recurring();
        assert_eq!(policy.event_mode, EmitMode::None);
        assert_eq!(policy.log_mode, EmitMode::Always);
    }

    #[test]
    fn event_text_defaults_and_overrides() {
        let cond = Condition::new("Ready", ConditionStatus::False, "Broken", "", t0());
        let policy = ObservabilityPolicy::info();
        assert_eq!(policy.event_reason(&cond), "ReadyBroken");
        assert_eq!(
            policy.event_message(&cond),
            "Condition Ready is False (reason=Broken)"
        );

        let custom = policy
            .with_event_reason("Custom")
            .with_event_message("custom message");
        assert_eq!(custom.event_reason(&cond), "Custom");
        assert_eq!(custom.event_message(&cond), "custom message");
    }

    #[test]
    fn emits_on_transition_and_recurring() {
        let old = vec![Condition::new("Steady", ConditionStatus::True, "Ok", "", t0())];
        let mut store = ConditionStore::new(&old, t0());
        store.mark_true("Steady", "Ok", "", ObservabilityPolicy::info());
        store.mark_false("Broken", "Bad", "bad", ObservabilityPolicy::error());
        store.mark_true("Quiet", "Ok", "", ObservabilityPolicy::silent());

        let transitions = diff_transitions(&old, &store.snapshot());
        let recorder = MemoryRecorder::new();
        let count = emit_observability(&recorder, &object(), &store, &transitions);

        assert_eq!(count, 1);
        let events = recorder.take();
        assert_eq!(events[0].reason, "BrokenBad");
        assert_eq!(events[0].level, EventLevel::Warning);
        assert!(recorder.events().is_empty());

        // Next reconcile: nothing transitions, the error still recurs.
        let snapshot = store.snapshot();
        let mut next = ConditionStore::new(&snapshot, t0());
        next.mark_true("Steady", "Ok", "", ObservabilityPolicy::info());
        next.mark_false("Broken", "Bad", "bad", ObservabilityPolicy::error());
        let transitions = diff_transitions(&snapshot, &next.snapshot());
        assert!(transitions.is_empty());
        assert_eq!(emit_observability(&recorder, &object(), &next, &transitions), 1);
    }
}
