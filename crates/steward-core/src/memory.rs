//! # In-Memory Cluster
//!
//! A reference client for tests and simulation. Objects are stored as flattened
//! field paths, each owned by the field manager that last wrote it:
//!
//! - applying as a new owner takes unowned paths and leaves foreign ones alone
//! - a path an owner stops sending is dropped
//! - status writes use a per-object version for optimistic concurrency

use crate::apply::{ApplyClient, ApplyReport, DesiredObject};
use crate::health::{ChildRef, LogSource};
use crate::pipeline::{ManagedResource, StatusWriter};
use crate::taxonomy::{ApiError, Failure};
use crate::types::{ObjectMeta, ObjectRef, OwnerReference};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

const LABELS_PREFIX: &str = "metadata.labels.";
const ANNOTATIONS_PREFIX: &str = "metadata.annotations.";
const TEMPLATE_LABELS_PREFIX: &str = "template.labels.";

// =============================================================================
// STORED OBJECTS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub metadata: ObjectMeta,
    fields: BTreeMap<String, Value>,
    owners: BTreeMap<String, String>,
}

impl StoredObject {
    fn new(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            fields: BTreeMap::new(),
            owners: BTreeMap::new(),
        }
    }

    /// Value at a flattened path such as `data.key` or `metadata.labels.app`.
    #[must_use]
    pub fn field(&self, path: &str) -> Option<&Value> {
        self.fields.get(path)
    }

    /// Field manager owning `path`.
    #[must_use]
    pub fn owner_of(&self, path: &str) -> Option<&str> {
        self.owners.get(path).map(String::as_str)
    }

    /// Labels of the embedded pod template.
    #[must_use]
    pub fn template_labels(&self) -> BTreeMap<String, String> {
        self.string_fields(TEMPLATE_LABELS_PREFIX)
    }

    fn string_fields(&self, prefix: &str) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .filter_map(|(path, value)| {
                let key = path.strip_prefix(prefix)?;
                Some((key.to_string(), value.as_str()?.to_string()))
            })
            .collect()
    }

    fn sync_metadata(&mut self) {
        self.metadata.labels = self.string_fields(LABELS_PREFIX);
        self.metadata.annotations = self.string_fields(ANNOTATIONS_PREFIX);
    }

    fn merge_owner_references(&mut self, incoming: &[OwnerReference]) {
        for reference in incoming {
            match self
                .metadata
                .owner_references
                .iter_mut()
                .find(|existing| existing.uid == reference.uid)
            {
                Some(existing) => *existing = reference.clone(),
                None => self.metadata.owner_references.push(reference.clone()),
            }
        }
    }
}

/// Flatten a desired object into owned leaf paths.
fn desired_fields(object: &DesiredObject) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten("", &object.body, &mut out);
    for (key, value) in &object.metadata.labels {
        out.insert(format!("{LABELS_PREFIX}{key}"), Value::String(value.clone()));
    }
    for (key, value) in &object.metadata.annotations {
        out.insert(format!("{ANNOTATIONS_PREFIX}{key}"), Value::String(value.clone()));
    }
    if let Some(labels) = &object.pod_template_labels {
        for (key, value) in labels {
            out.insert(format!("{TEMPLATE_LABELS_PREFIX}{key}"), Value::String(value.clone()));
        }
    }
    out
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, out);
            }
        }
        leaf => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), leaf.clone());
            }
        }
    }
}

#[derive(Debug, Clone)]
struct StoredStatus {
    version: u64,
    value: Value,
}

// =============================================================================
// CLUSTER
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryCluster {
    objects: BTreeMap<ObjectRef, StoredObject>,
    statuses: BTreeMap<ObjectRef, StoredStatus>,
    applied: Vec<ObjectRef>,
    deleted: Vec<ObjectRef>,
    fail_apply: Option<Failure>,
    fail_delete: Option<Failure>,
    fail_status: Option<Failure>,
}

impl MemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored object, or a NotFound API error.
    pub fn get(&self, target: &ObjectRef) -> Result<&StoredObject, Failure> {
        self.objects
            .get(target)
            .ok_or_else(|| ApiError::not_found(format!("{target} not found")).into())
    }

    #[must_use]
    pub fn contains(&self, target: &ObjectRef) -> bool {
        self.objects.contains_key(target)
    }

    pub fn objects(&self) -> impl Iterator<Item = (&ObjectRef, &StoredObject)> {
        self.objects.iter()
    }

    /// Every successful apply, in call order.
    #[must_use]
    pub fn applied(&self) -> &[ObjectRef] {
        &self.applied
    }

    /// Every successful delete, in call order.
    #[must_use]
    pub fn deleted(&self) -> &[ObjectRef] {
        &self.deleted
    }

    /// Last persisted status of `target`.
    #[must_use]
    pub fn status_of(&self, target: &ObjectRef) -> Option<&Value> {
        self.statuses.get(target).map(|s| &s.value)
    }

    #[must_use]
    pub fn status_version(&self, target: &ObjectRef) -> Option<u64> {
        self.statuses.get(target).map(|s| s.version)
    }

    /// Simulate a concurrent writer: bumps the status version of `target`.
    pub fn touch_status(&mut self, target: &ObjectRef) {
        let entry = self.statuses.entry(target.clone()).or_insert(StoredStatus {
            version: 0,
            value: Value::Null,
        });
        entry.version += 1;
    }

    pub fn fail_next_apply(&mut self, failure: impl Into<Failure>) {
        self.fail_apply = Some(failure.into());
    }

    pub fn fail_next_delete(&mut self, failure: impl Into<Failure>) {
        self.fail_delete = Some(failure.into());
    }

    pub fn fail_next_status(&mut self, failure: impl Into<Failure>) {
        self.fail_status = Some(failure.into());
    }
}

impl ApplyClient for MemoryCluster {
    fn apply(&mut self, object: &DesiredObject, field_owner: &str) -> Result<ApplyReport, Failure> {
        if let Some(failure) = self.fail_apply.take() {
            return Err(failure);
        }
        let target = object.object_ref().ok_or_else(|| {
            Failure::other(format!("object {} has no kind", object.metadata.name))
        })?;
        let desired = desired_fields(object);

        let stored = self.objects.entry(target.clone()).or_insert_with(|| {
            StoredObject::new(ObjectMeta::named(
                object.metadata.namespace.clone(),
                object.metadata.name.clone(),
            ))
        });

        let released: Vec<String> = stored
            .owners
            .iter()
            .filter(|(path, owner)| owner.as_str() == field_owner && !desired.contains_key(*path))
            .map(|(path, _)| path.clone())
            .collect();
        for path in released {
            stored.owners.remove(&path);
            stored.fields.remove(&path);
        }

        let mut report = ApplyReport::default();
        for (path, value) in desired {
            let foreign = stored
                .owners
                .get(&path)
                .is_some_and(|owner| owner != field_owner);
            if foreign {
                if stored.fields.get(&path) != Some(&value) {
                    report.conflicts.push(path);
                }
                continue;
            }
            stored.fields.insert(path.clone(), value);
            stored.owners.insert(path, field_owner.to_string());
        }

        stored.merge_owner_references(&object.metadata.owner_references);
        stored.sync_metadata();
        stored.metadata.resource_version = Some(stored.metadata.resource_version.unwrap_or(0) + 1);
        self.applied.push(target);
        Ok(report)
    }

    fn delete(&mut self, target: &ObjectRef) -> Result<(), Failure> {
        if let Some(failure) = self.fail_delete.take() {
            return Err(failure);
        }
        match self.objects.remove(target) {
            Some(_) => {
                self.deleted.push(target.clone());
                Ok(())
            }
            None => Err(ApiError::not_found(format!("{target} not found")).into()),
        }
    }
}

impl<R> StatusWriter<R> for MemoryCluster
where
    R: ManagedResource,
    R::Status: Serialize,
{
    fn update_status(&mut self, resource: &mut R) -> Result<(), Failure> {
        if let Some(failure) = self.fail_status.take() {
            return Err(failure);
        }
        let target = resource.object_ref();
        let value = serde_json::to_value(resource.status())
            .map_err(|e| Failure::other(format!("encoding status of {target}: {e}")))?;
        let seen = resource.metadata().resource_version.unwrap_or(0);

        let entry = self.statuses.entry(target.clone()).or_insert(StoredStatus {
            version: seen,
            value: Value::Null,
        });
        if entry.version != seen {
            return Err(ApiError::conflict(format!(
                "{target} has been modified (have version {seen}, stored {})",
                entry.version
            ))
            .into());
        }
        entry.version += 1;
        entry.value = value;
        resource.metadata_mut().resource_version = Some(entry.version);
        Ok(())
    }
}

// =============================================================================
// LOGS
// =============================================================================

/// Canned container logs keyed by pod and container.
#[derive(Debug, Clone, Default)]
pub struct StaticLogs {
    logs: BTreeMap<(ChildRef, String), String>,
}

impl StaticLogs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pod: ChildRef, container: impl Into<String>, text: impl Into<String>) {
        self.logs.insert((pod, container.into()), text.into());
    }
}

impl LogSource for StaticLogs {
    fn tail(&self, pod: &ChildRef, container: &str, lines: usize) -> Result<String, Failure> {
        let text = self
            .logs
            .get(&(pod.clone(), container.to_string()))
            .ok_or_else(|| Failure::from(ApiError::not_found(format!("no logs for {}/{container}", pod.name))))?;
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupVersionKind;
    use serde_json::json;

    fn config_map(data: Value) -> DesiredObject {
        DesiredObject::with_type_name("ConfigMap", ObjectMeta::named("ns", "cm"), json!({ "data": data }))
            .with_kind(GroupVersionKind::new("", "v1", "ConfigMap"))
    }

    fn cm_ref() -> ObjectRef {
        ObjectRef::new(GroupVersionKind::new("", "v1", "ConfigMap"), "ns", "cm")
    }

    #[test]
    fn foreign_fields_are_left_alone() {
        let mut cluster = MemoryCluster::new();
        cluster
            .apply(&config_map(json!({ "a": "1", "b": "2" })), "kubectl")
            .expect("seed");
        let report = cluster
            .apply(&config_map(json!({ "a": "9", "c": "3" })), "steward")
            .expect("apply");

        assert_eq!(report.conflicts, vec!["data.a".to_string()]);
        let stored = cluster.get(&cm_ref()).expect("stored");
        assert_eq!(stored.field("data.a"), Some(&json!("1")));
        assert_eq!(stored.field("data.c"), Some(&json!("3")));
        assert_eq!(stored.owner_of("data.b"), Some("kubectl"));
        assert_eq!(stored.owner_of("data.c"), Some("steward"));
    }

    #[test]
    fn dropped_fields_are_released() {
        let mut cluster = MemoryCluster::new();
        cluster
            .apply(&config_map(json!({ "a": "1", "b": "2" })), "steward")
            .expect("first");
        cluster
            .apply(&config_map(json!({ "a": "1" })), "steward")
            .expect("second");
        let stored = cluster.get(&cm_ref()).expect("stored");
        assert_eq!(stored.field("data.b"), None);
        assert_eq!(stored.metadata.resource_version, Some(2));
    }

    #[test]
    fn labels_are_reflected_in_metadata() {
        let mut cluster = MemoryCluster::new();
        let mut object = config_map(json!({}));
        object.metadata.labels.insert("team".into(), "core".into());
        cluster.apply(&object, "steward").expect("apply");
        let stored = cluster.get(&cm_ref()).expect("stored");
        assert_eq!(stored.metadata.labels.get("team").map(String::as_str), Some("core"));
    }

    #[test]
    fn delete_missing_is_not_found() {
        let mut cluster = MemoryCluster::new();
        let err = cluster.delete(&cm_ref()).expect_err("missing");
        assert!(err.is_not_found());
        assert!(cluster.get(&cm_ref()).expect_err("missing").is_not_found());
    }

    #[test]
    fn injected_failures_fire_once() {
        let mut cluster = MemoryCluster::new();
        cluster.fail_next_apply(ApiError::service_unavailable("down"));
        assert!(cluster.apply(&config_map(json!({})), "s").is_err());
        assert!(cluster.apply(&config_map(json!({})), "s").is_ok());
    }

    #[test]
    fn static_logs_tail() {
        let mut logs = StaticLogs::new();
        let pod = ChildRef::new("Pod", "ns", "p");
        logs.insert(pod.clone(), "main", "one\ntwo\nthree");
        assert_eq!(logs.tail(&pod, "main", 2).expect("logs"), "two\nthree");
        assert!(logs.tail(&pod, "other", 2).is_err());
    }
}
