//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the Steward reconciliation engine:
//! - Condition records (`Condition`, `ConditionStatus`)
//! - The status ladder (`Status`) and its priorities
//! - Object identity (`GroupVersionKind`, `ObjectRef`, `ObjectMeta`, `OwnerReference`)
//! - Component roles (`DependencyType`)
//! - Engine errors (`StewardError`)
//!
//! ## Determinism Guarantees
//!
//! All identity types implement `Ord` so they can key `BTreeMap`s and
//! produce a stable apply order. Label and annotation maps are `BTreeMap`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// WELL-KNOWN CONDITION TYPES
// =============================================================================

/// Aggregate readiness condition, derived from every component.
pub const CONDITION_READY: &str = "Ready";
/// Set to `False` while any authentication error is observed.
pub const CONDITION_AUTH_VALID: &str = "AuthValid";
/// Set to `False` while the spec is invalid or an upstream reference is missing.
pub const CONDITION_CONFIG_VALID: &str = "ConfigValid";
/// Set to `False` while infrastructure (retriable) errors are observed.
pub const CONDITION_DEPENDENCIES_REACHABLE: &str = "DependenciesReachable";

// =============================================================================
// CONDITIONS
// =============================================================================

/// Tri-state value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    /// Canonical string form, as written to the status subresource.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed status record with a transition timestamp.
///
/// `last_transition_time` only moves when `status` or `reason` change.
/// A message-only edit keeps the previous timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a condition stamped at `now`.
    #[must_use]
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now,
        }
    }

    /// True when `status` is `True`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// True when `status` is `False`.
    #[must_use]
    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }
}

// =============================================================================
// STATUS LADDER
// =============================================================================

/// Aggregate lifecycle status of a managed resource or component.
///
/// Priorities (higher is healthier):
/// Running 7, Ready 6, Progressing 5, Starting 4, Pending 3,
/// Degraded 2, NotAvailable 1, Failed 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Starting,
    Progressing,
    Ready,
    Running,
    Degraded,
    NotAvailable,
    Failed,
}

impl Status {
    /// Position on the health ladder. Lower means worse.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Running => 7,
            Self::Ready => 6,
            Self::Progressing => 5,
            Self::Starting => 4,
            Self::Pending => 3,
            Self::Degraded => 2,
            Self::NotAvailable => 1,
            Self::Failed => 0,
        }
    }

    /// Error states: Degraded, NotAvailable, Failed.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Degraded | Self::NotAvailable | Self::Failed)
    }

    /// Ready or Running.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    /// The worse of two statuses. Ties keep `self`.
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        if other.priority() < self.priority() {
            other
        } else {
            self
        }
    }

    /// Push a not-ready, non-error status down to `Degraded`.
    ///
    /// Ready states and states already at or below `Degraded` are unchanged.
    #[must_use]
    pub const fn degrade(self) -> Self {
        match self {
            Self::Progressing | Self::Starting | Self::Pending => Self::Degraded,
            other => other,
        }
    }

    /// Canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Starting => "Starting",
            Self::Progressing => "Progressing",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Degraded => "Degraded",
            Self::NotAvailable => "NotAvailable",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// COMPONENT ROLE
// =============================================================================

/// How a component relates to the managed resource.
///
/// Upstream components are consumed (a missing one blocks apply).
/// Downstream components are produced (a missing one is still being created).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Upstream,
    Downstream,
    #[default]
    Unspecified,
}

// =============================================================================
// OBJECT IDENTITY
// =============================================================================

/// Fully qualified kind of a cluster object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a new group/version/kind triple.
    #[must_use]
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// `group/version`, or just `version` for the core group.
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Reference to a single cluster object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: GroupVersionKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    #[must_use]
    pub fn new(kind: GroupVersionKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind.kind, self.namespace, self.name)
        }
    }
}

/// Ownership link from a child object to its controlling parent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: bool,
}

/// Object metadata shared by managed resources and the objects they own.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Metadata with just a namespace and name.
    #[must_use]
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Builder: add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Builder: add an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Engine-level errors that are not observations of the outside world.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StewardError {
    /// A desired object's Rust type was never registered with a kind.
    #[error("no kind registered for type {type_name}")]
    UnknownKind { type_name: String },

    /// A desired object was preset with a kind other than the one registered for its type.
    #[error("type {type_name} is registered as {registered} but the object was preset as {preset}")]
    KindMismatch {
        type_name: String,
        preset: String,
        registered: String,
    },

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The managed resource carries no UID, so children cannot be owned.
    #[error("resource {0} has no uid; owner references cannot be set")]
    MissingOwnerUid(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_priorities_follow_ladder() {
        let ladder = [
            Status::Failed,
            Status::NotAvailable,
            Status::Degraded,
            Status::Pending,
            Status::Starting,
            Status::Progressing,
            Status::Ready,
            Status::Running,
        ];
        for pair in ladder.windows(2) {
            assert!(pair[0].priority() < pair[1].priority());
        }
    }

    #[test]
    fn worst_prefers_lower_priority() {
        assert_eq!(Status::Ready.worst(Status::Degraded), Status::Degraded);
        assert_eq!(Status::Failed.worst(Status::Pending), Status::Failed);
        assert_eq!(Status::Progressing.worst(Status::Running), Status::Progressing);
    }

    #[test]
    fn degrade_only_moves_not_ready_states() {
        assert_eq!(Status::Progressing.degrade(), Status::Degraded);
        assert_eq!(Status::Pending.degrade(), Status::Degraded);
        assert_eq!(Status::Ready.degrade(), Status::Ready);
        assert_eq!(Status::Failed.degrade(), Status::Failed);
        assert_eq!(Status::Degraded.degrade(), Status::Degraded);
    }

    #[test]
    fn condition_serializes_with_type_key() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp");
        let cond = Condition::new("Ready", ConditionStatus::True, "AllComponentsReady", "ok", now);
        let json = serde_json::to_value(&cond).expect("serialize");
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn api_version_omits_core_group() {
        assert_eq!(GroupVersionKind::new("", "v1", "Pod").api_version(), "v1");
        assert_eq!(
            GroupVersionKind::new("batch", "v1", "Job").api_version(),
            "batch/v1"
        );
    }

    #[test]
    fn object_ref_display() {
        let r = ObjectRef::new(GroupVersionKind::new("", "v1", "ConfigMap"), "ns", "cm");
        assert_eq!(r.to_string(), "ConfigMap ns/cm");
    }
}
