//! # Declarative Apply Engine
//!
//! Turns a `PlanResult` into a deterministic sequence of deletes and
//! field-scoped upserts.
//!
//! ## Steps
//!
//! 1. Stamp each object's kind from the `TypeRegistry` (unknown type is a hard error).
//! 2. Propagate labels from the managed resource.
//! 3. Set the controller owner reference on owned objects.
//! 4. Sort by (kind, namespace, name).
//! 5. Delete, then apply, through an `ApplyClient`.

use crate::config::LabelPropagation;
use crate::taxonomy::Failure;
use crate::types::{GroupVersionKind, ObjectMeta, ObjectRef, OwnerReference, StewardError};
use glob::{MatchOptions, Pattern};
use std::any::type_name;
use std::collections::BTreeMap;
use std::time::Duration;

// =============================================================================
// DESIRED OBJECTS
// =============================================================================

/// An object the domain wants to exist, before kind stamping.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredObject {
    type_name: String,
    kind: Option<GroupVersionKind>,
    pub metadata: ObjectMeta,
    pub body: serde_json::Value,
    /// Labels of the embedded pod template, for job-like objects.
    pub pod_template_labels: Option<BTreeMap<String, String>>,
}

impl DesiredObject {
    /// Desired object of Rust type `T`, with an arbitrary JSON body.
    #[must_use]
    pub fn new<T: ?Sized>(metadata: ObjectMeta, body: serde_json::Value) -> Self {
        Self::with_type_name(type_name::<T>(), metadata, body)
    }

    /// Desired object registered under an explicit type name.
    #[must_use]
    pub fn with_type_name(type_name: impl Into<String>, metadata: ObjectMeta, body: serde_json::Value) -> Self {
        Self {
            type_name: type_name.into(),
            kind: None,
            metadata,
            body,
            pod_template_labels: None,
        }
    }

    /// Builder: preset the kind. Objects that still pass through a `TypeRegistry`
    /// must agree with the registered kind.
    #[must_use]
    pub fn with_kind(mut self, kind: GroupVersionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Builder: mark as job-like, with an (initially empty) pod template.
    #[must_use]
    pub fn with_pod_template(mut self) -> Self {
        self.pod_template_labels.get_or_insert_with(BTreeMap::new);
        self
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Kind, once stamped.
    #[must_use]
    pub fn kind(&self) -> Option<&GroupVersionKind> {
        self.kind.as_ref()
    }

    /// Reference to this object, once stamped.
    #[must_use]
    pub fn object_ref(&self) -> Option<ObjectRef> {
        self.kind.as_ref().map(|kind| {
            ObjectRef::new(kind.clone(), self.metadata.namespace.clone(), self.metadata.name.clone())
        })
    }

    fn sort_key(&self) -> (Option<&GroupVersionKind>, &str, &str) {
        (self.kind.as_ref(), &self.metadata.namespace, &self.metadata.name)
    }
}

/// Maps Rust type names to cluster kinds.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    kinds: BTreeMap<String, GroupVersionKind>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register Rust type `T` as `kind`.
    pub fn register<T: ?Sized>(&mut self, kind: GroupVersionKind) -> &mut Self {
        self.register_name(type_name::<T>(), kind)
    }

    /// Register an explicit type name.
    pub fn register_name(&mut self, type_name: impl Into<String>, kind: GroupVersionKind) -> &mut Self {
        self.kinds.insert(type_name.into(), kind);
        self
    }

    #[must_use]
    pub fn kind_of(&self, type_name: &str) -> Option<&GroupVersionKind> {
        self.kinds.get(type_name)
    }

    /// Stamp `object`'s kind. A preset kind that differs from the registered one is an error.
    pub fn stamp(&self, object: &mut DesiredObject) -> Result<(), StewardError> {
        let kind = self
            .kind_of(&object.type_name)
            .ok_or_else(|| StewardError::UnknownKind {
                type_name: object.type_name.clone(),
            })?;
        if let Some(preset) = object.kind.as_ref().filter(|preset| *preset != kind) {
            return Err(StewardError::KindMismatch {
                type_name: object.type_name.clone(),
                preset: preset.to_string(),
                registered: kind.to_string(),
            });
        }
        object.kind = Some(kind.clone());
        Ok(())
    }
}

// =============================================================================
// PLAN
// =============================================================================

/// Output of domain planning. Pure data; built fresh every reconcile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanResult {
    /// Objects owned by the managed resource.
    pub to_apply: Vec<DesiredObject>,
    /// Objects applied without an owner reference (shared or cluster-scoped).
    pub to_apply_without_owner_ref: Vec<DesiredObject>,
    pub to_delete: Vec<ObjectRef>,
    /// Explicit requeue requested by the domain.
    pub requeue_after: Option<Duration>,
}

impl PlanResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, object: DesiredObject) {
        self.to_apply.push(object);
    }

    pub fn apply_without_owner_ref(&mut self, object: DesiredObject) {
        self.to_apply_without_owner_ref.push(object);
    }

    pub fn delete(&mut self, target: ObjectRef) {
        self.to_delete.push(target);
    }

    pub fn requeue_after(&mut self, delay: Duration) {
        self.requeue_after = Some(delay);
    }

    fn objects_mut(&mut self) -> impl Iterator<Item = &mut DesiredObject> {
        self.to_apply
            .iter_mut()
            .chain(self.to_apply_without_owner_ref.iter_mut())
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Result of one upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Field paths left alone because another owner holds a different value.
    pub conflicts: Vec<String>,
}

/// Write side of the cluster.
pub trait ApplyClient {
    /// Field-scoped merge-upsert of `object` as `field_owner`.
    fn apply(&mut self, object: &DesiredObject, field_owner: &str) -> Result<ApplyReport, Failure>;

    fn delete(&mut self, target: &ObjectRef) -> Result<(), Failure>;
}

/// Which half of the apply phase failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Delete,
    Apply,
}

/// First failure of the apply phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyFailure {
    pub phase: ApplyPhase,
    pub target: ObjectRef,
    pub failure: Failure,
}

impl ApplyFailure {
    /// Human-readable summary, e.g. `Failed to apply ConfigMap ns/name: ...`.
    #[must_use]
    pub fn message(&self) -> String {
        let verb = match self.phase {
            ApplyPhase::Delete => "delete",
            ApplyPhase::Apply => "apply",
        };
        format!("Failed to {verb} {}: {}", self.target, self.failure)
    }
}

// =============================================================================
// PREPARATION
// =============================================================================

/// Set or replace the controller owner reference, matched by UID.
pub fn set_owner_reference(object: &mut DesiredObject, owner: &OwnerReference) {
    let refs = &mut object.metadata.owner_references;
    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) => *existing = owner.clone(),
        None => refs.push(owner.clone()),
    }
}

/// Sort by (kind, namespace, name), ascending.
pub fn sort_objects(objects: &mut [DesiredObject]) {
    objects.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Copy parent labels onto `child` where the child lacks them.
///
/// Labels under `{system_domain}/` always copy; others only when the key
/// matches one of `user_patterns` (see `LabelPropagation::active_patterns`).
/// Copied labels are mirrored onto the pod template of job-like objects.
pub fn propagate_labels(
    parent: &BTreeMap<String, String>,
    child: &mut DesiredObject,
    system_domain: &str,
    user_patterns: &[Pattern],
) {
    if parent.is_empty() {
        return;
    }
    let system_prefix = format!("{system_domain}/");

    let mut copied = BTreeMap::new();
    for (key, value) in parent {
        if child.metadata.labels.contains_key(key) {
            continue;
        }
        let system = key.starts_with(&system_prefix);
        if system || matches_any(key, user_patterns) {
            child.metadata.labels.insert(key.clone(), value.clone());
            copied.insert(key.clone(), value.clone());
        }
    }

    if let Some(template) = child.pod_template_labels.as_mut() {
        for (key, value) in copied {
            template.entry(key).or_insert(value);
        }
    }
}

/// Add controller labels to every planned object without overwriting.
///
/// Job-like objects also get them on the pod template, except `managed_by_key`.
pub fn apply_controller_labels(plan: &mut PlanResult, labels: &BTreeMap<String, String>, managed_by_key: &str) {
    if labels.is_empty() {
        return;
    }
    for object in plan.objects_mut() {
        for (key, value) in labels {
            object
                .metadata
                .labels
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        if let Some(template) = object.pod_template_labels.as_mut() {
            for (key, value) in labels.iter().filter(|(k, _)| k.as_str() != managed_by_key) {
                template.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
}

fn matches_any(key: &str, patterns: &[Pattern]) -> bool {
    let options = MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::default()
    };
    patterns.iter().any(|p| p.matches_with(key, options))
}

/// Stamp, label, own and sort every planned object. Returns the sorted apply list.
///
/// `owner` is required when `plan.to_apply` is non-empty.
pub fn prepare_objects(
    plan: &mut PlanResult,
    registry: &TypeRegistry,
    owner: Option<&OwnerReference>,
    parent_labels: &BTreeMap<String, String>,
    system_domain: &str,
    propagation: &LabelPropagation,
) -> Result<Vec<DesiredObject>, StewardError> {
    let user_patterns = propagation.active_patterns()?;
    for object in plan.objects_mut() {
        registry.stamp(object)?;
        propagate_labels(parent_labels, object, system_domain, &user_patterns);
    }
    if let Some(owner) = owner {
        for object in &mut plan.to_apply {
            set_owner_reference(object, owner);
        }
    }

    let mut objects: Vec<DesiredObject> = plan
        .to_apply
        .drain(..)
        .chain(plan.to_apply_without_owner_ref.drain(..))
        .collect();
    sort_objects(&mut objects);
    Ok(objects)
}

/// Delete then apply. NotFound on delete counts as success. Stops at the first failure.
pub fn apply_desired_state<C: ApplyClient + ?Sized>(
    client: &mut C,
    field_owner: &str,
    deletes: &[ObjectRef],
    objects: &[DesiredObject],
) -> Result<Vec<ApplyReport>, ApplyFailure> {
    for target in deletes {
        match client.delete(target) {
            Ok(()) => tracing::debug!(object = %target, "deleted"),
            Err(failure) if failure.is_not_found() => {
                tracing::debug!(object = %target, "already absent");
            }
            Err(failure) => {
                return Err(ApplyFailure {
                    phase: ApplyPhase::Delete,
                    target: target.clone(),
                    failure,
                });
            }
        }
    }

    let mut reports = Vec::with_capacity(objects.len());
    for object in objects {
        let Some(target) = object.object_ref() else {
            continue;
        };
        match client.apply(object, field_owner) {
            Ok(report) => {
                if !report.conflicts.is_empty() {
                    tracing::debug!(
                        object = %target,
                        conflicts = report.conflicts.len(),
                        "fields held by another owner left untouched"
                    );
                }
                tracing::debug!(object = %target, "applied");
                reports.push(report);
            }
            Err(failure) => {
                return Err(ApplyFailure {
                    phase: ApplyPhase::Apply,
                    target,
                    failure,
                });
            }
        }
    }
    Ok(reports)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct ConfigMap;
    struct Job;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .register::<ConfigMap>(GroupVersionKind::new("", "v1", "ConfigMap"))
            .register::<Job>(GroupVersionKind::new("batch", "v1", "Job"));
        registry
    }

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "steward.dev/v1".into(),
            kind: "Service".into(),
            name: "svc".into(),
            uid: "uid-1".into(),
            controller: true,
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        struct Unregistered;
        let mut obj = DesiredObject::new::<Unregistered>(ObjectMeta::named("ns", "x"), json!({}));
        let err = registry().stamp(&mut obj).expect_err("unregistered");
        assert!(matches!(err, StewardError::UnknownKind { .. }));
    }

    #[test]
    fn owner_reference_replaced_by_uid() {
        let mut obj = DesiredObject::new::<ConfigMap>(ObjectMeta::named("ns", "cm"), json!({}));
        set_owner_reference(&mut obj, &owner());
        let mut renamed = owner();
        renamed.name = "svc-renamed".into();
        set_owner_reference(&mut obj, &renamed);
        assert_eq!(obj.metadata.owner_references.len(), 1);
        assert_eq!(obj.metadata.owner_references[0].name, "svc-renamed");

        let mut other = owner();
        other.uid = "uid-2".into();
        set_owner_reference(&mut obj, &other);
        assert_eq!(obj.metadata.owner_references.len(), 2);
    }

    #[test]
    fn sort_is_kind_namespace_name() {
        let reg = registry();
        let mut objs = vec![
            DesiredObject::new::<Job>(ObjectMeta::named("a", "j"), json!({})),
            DesiredObject::new::<ConfigMap>(ObjectMeta::named("b", "a"), json!({})),
            DesiredObject::new::<ConfigMap>(ObjectMeta::named("a", "z"), json!({})),
            DesiredObject::new::<ConfigMap>(ObjectMeta::named("a", "b"), json!({})),
        ];
        for o in &mut objs {
            reg.stamp(o).expect("stamp");
        }
        sort_objects(&mut objs);
        let names: Vec<_> = objs
            .iter()
            .map(|o| format!("{}/{}/{}", o.kind().expect("kind").kind, o.metadata.namespace, o.metadata.name))
            .collect();
        assert_eq!(names, vec!["ConfigMap/a/b", "ConfigMap/a/z", "ConfigMap/b/a", "Job/a/j"]);
    }

    #[test]
    fn system_labels_always_propagate() {
        let parent: BTreeMap<String, String> = [
            ("steward.dev/service".to_string(), "svc".to_string()),
            ("team".to_string(), "ml".to_string()),
        ]
        .into_iter()
        .collect();
        let mut child = DesiredObject::new::<ConfigMap>(ObjectMeta::named("ns", "cm"), json!({}));
        propagate_labels(&parent, &mut child, "steward.dev", &[]);
        assert_eq!(child.metadata.labels.get("steward.dev/service").map(String::as_str), Some("svc"));
        assert!(!child.metadata.labels.contains_key("team"));
    }

    #[test]
    fn user_labels_need_matching_pattern() {
        let parent: BTreeMap<String, String> = [
            ("org.my/owner".to_string(), "alice".to_string()),
            ("team-a".to_string(), "x".to_string()),
            ("other".to_string(), "y".to_string()),
        ]
        .into_iter()
        .collect();
        let user_patterns = patterns(&["org.my/*", "team-?"]);
        let mut child = DesiredObject::new::<Job>(ObjectMeta::named("ns", "j"), json!({}))
            .with_pod_template();
        child.metadata.labels.insert("team-a".into(), "keep".into());
        propagate_labels(&parent, &mut child, "steward.dev", &user_patterns);

        assert_eq!(child.metadata.labels.get("team-a").map(String::as_str), Some("keep"));
        assert!(child.metadata.labels.contains_key("org.my/owner"));
        assert!(!child.metadata.labels.contains_key("other"));
        let template = child.pod_template_labels.expect("template");
        assert!(template.contains_key("org.my/owner"));
        assert!(!template.contains_key("team-a"));
    }

    #[test]
    fn controller_labels_skip_managed_by_on_template() {
        let mut plan = PlanResult::new();
        plan.apply(DesiredObject::new::<Job>(ObjectMeta::named("ns", "j"), json!({})).with_pod_template());
        plan.apply_without_owner_ref(
            DesiredObject::new::<ConfigMap>(ObjectMeta::named("ns", "cm").with_label("tier", "keep"), json!({})),
        );
        let labels: BTreeMap<String, String> = [
            ("app.kubernetes.io/managed-by".to_string(), "steward".to_string()),
            ("tier".to_string(), "backend".to_string()),
        ]
        .into_iter()
        .collect();
        apply_controller_labels(&mut plan, &labels, "app.kubernetes.io/managed-by");

        let job = &plan.to_apply[0];
        assert!(job.metadata.labels.contains_key("app.kubernetes.io/managed-by"));
        let template = job.pod_template_labels.as_ref().expect("template");
        assert!(!template.contains_key("app.kubernetes.io/managed-by"));
        assert_eq!(template.get("tier").map(String::as_str), Some("backend"));
        let cm = &plan.to_apply_without_owner_ref[0];
        assert_eq!(cm.metadata.labels.get("tier").map(String::as_str), Some("keep"));
    }

    fn patterns(raw: &[&str]) -> Vec<Pattern> {
        raw.iter().map(|p| Pattern::new(p).expect("pattern")).collect()
    }

    #[test]
    fn label_pattern_semantics() {
        let matches = |pattern: &str, key: &str| matches_any(key, &patterns(&[pattern]));
        assert!(matches("team-*", "team-ml"));
        assert!(matches("org.my/*", "org.my/owner"));
        assert!(!matches("org.*", "org.my/owner"));
        assert!(matches("a?c", "abc"));
        assert!(!matches("a?c", "a/c"));
        assert!(matches("*", "anything"));
        assert!(!matches("exact", "exactly"));
        assert!(matches("*-*-z", "a-b-c-z"));
    }

    #[test]
    fn label_patterns_support_character_classes() {
        let matches = |pattern: &str, key: &str| matches_any(key, &patterns(&[pattern]));
        assert!(matches("team-[ab]", "team-a"));
        assert!(!matches("team-[ab]", "team-c"));
        assert!(matches("env-[!p]*", "env-dev"));
        assert!(!matches("env-[!p]*", "env-prod"));
        assert!(!matches("org[./]my", "org/my"));
    }

    #[test]
    fn preset_kind_must_agree_with_registry() {
        let meta = || ObjectMeta::named("ns", "cm");
        let mut agreeing = DesiredObject::new::<ConfigMap>(meta(), json!({}))
            .with_kind(GroupVersionKind::new("", "v1", "ConfigMap"));
        registry().stamp(&mut agreeing).expect("same kind");

        let mut conflicting = DesiredObject::new::<ConfigMap>(meta(), json!({}))
            .with_kind(GroupVersionKind::new("", "v1", "Secret"));
        let err = registry().stamp(&mut conflicting).expect_err("conflict");
        assert!(matches!(err, StewardError::KindMismatch { .. }));
        assert_eq!(conflicting.kind().map(|k| k.kind.as_str()), Some("Secret"));
    }

    #[test]
    fn prepare_rejects_malformed_label_pattern() {
        let mut plan = PlanResult::new();
        plan.apply(DesiredObject::new::<ConfigMap>(ObjectMeta::named("ns", "cm"), json!({})));
        let propagation = LabelPropagation {
            enabled: true,
            match_patterns: vec!["team-[ab".into()],
        };
        let err = prepare_objects(&mut plan, &registry(), Some(&owner()), &BTreeMap::new(), "steward.dev", &propagation)
            .expect_err("malformed");
        assert!(matches!(err, StewardError::InvalidConfig(_)));
    }

    #[test]
    fn prepare_owns_only_to_apply() {
        let mut plan = PlanResult::new();
        plan.apply(DesiredObject::new::<ConfigMap>(ObjectMeta::named("ns", "owned"), json!({})));
        plan.apply_without_owner_ref(DesiredObject::new::<ConfigMap>(ObjectMeta::named("ns", "shared"), json!({})));
        let objects = prepare_objects(
            &mut plan,
            &registry(),
            Some(&owner()),
            &BTreeMap::new(),
            "steward.dev",
            &LabelPropagation::default(),
        )
        .expect("prepare");
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].metadata.name, "owned");
        assert_eq!(objects[0].metadata.owner_references.len(), 1);
        assert!(objects[1].metadata.owner_references.is_empty());
    }
}
