//! # Scenarios
//!
//! A scenario describes one managed resource, its persisted conditions, the
//! component health the domain would report and the objects it wants. It is
//! reconciled against a `MemoryCluster` with a manual clock, so grace periods
//! and escalation can be stepped through deterministically.
//!
//! ```toml
//! [resource]
//! name = "shop"
//! uid = "6f1c"
//!
//! [[components]]
//! name = "Database"
//! dependency = "upstream"
//! watch = { kind = "Secret", name = "db-creds" }
//!
//! [[components]]
//! name = "Cache"
//! errors = [{ kind = "api", reason = "ServiceUnavailable", message = "cache down" }]
//!
//! [[objects]]
//! kind = "ConfigMap"
//! name = "shop-settings"
//! body = { data = { mode = "prod" } }
//! ```

use crate::{HarnessError, read_input};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use steward_core::apply::apply_controller_labels;
use steward_core::observability::RecordedEvent;
use steward_core::{
    ApiError, ApiReason, ApplyClient, CancellationToken, CategorizedError, Clock, ComponentHealth,
    Condition, ConditionStatus, DependencyType, DesiredObject, DomainReconciler, EngineConfig,
    ErrorCategory, EventLevel, Failure, FetchResult, GroupVersionKind, ManagedResource,
    ManualClock, MemoryCluster, MemoryRecorder, ObjectMeta, ObjectRef, Observation, Pipeline,
    PlanResult, ReconcileContext, ReconcileOutcome, StandardStatus, Status, TransportError,
    TransportKind, TypeRegistry,
};

// =============================================================================
// SCENARIO MODEL
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub resource: ResourceSpec,
    /// Conditions already persisted on the resource.
    #[serde(default)]
    pub conditions: Vec<PriorCondition>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    /// Desired objects planned every reconcile.
    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
    /// Objects present in the cluster before the first reconcile.
    #[serde(default)]
    pub existing: Vec<ObjectSpec>,
    #[serde(default)]
    pub deletes: Vec<RefSpec>,
    pub requeue_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Required when the scenario has owned objects.
    pub uid: Option<String>,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriorCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// How long ago the condition last transitioned.
    #[serde(default)]
    pub age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub dependency: DependencyType,
    pub state: Option<Status>,
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorSpec>,
    /// Object whose presence in the cluster decides this component's health.
    pub watch: Option<RefSpec>,
}

/// A failure the component reports.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ErrorSpec {
    Api {
        reason: ApiReason,
        code: Option<u16>,
        #[serde(default)]
        message: String,
    },
    Transport {
        transport: TransportKind,
        #[serde(default)]
        operation: String,
        #[serde(default)]
        detail: String,
    },
    Categorized {
        category: ErrorCategory,
        reason: String,
        #[serde(default)]
        message: String,
    },
    Other {
        message: String,
    },
}

impl ErrorSpec {
    #[must_use]
    pub fn to_failure(&self) -> Failure {
        match self {
            Self::Api {
                reason,
                code,
                message,
            } => {
                let code = code.unwrap_or_else(|| reason.default_code());
                ApiError::new(code, *reason, message.clone()).into()
            }
            Self::Transport {
                transport,
                operation,
                detail,
            } => TransportError::new(*transport, operation.clone(), detail.clone()).into(),
            Self::Categorized {
                category,
                reason,
                message,
            } => CategorizedError::new(*category, reason.clone(), message.clone()).into(),
            Self::Other { message } => Failure::other(message.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefSpec {
    #[serde(default)]
    pub group: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub kind: String,
    /// Defaults to the resource's namespace.
    pub namespace: Option<String>,
    pub name: String,
}

impl RefSpec {
    #[must_use]
    pub fn to_ref(&self, default_namespace: &str) -> ObjectRef {
        ObjectRef::new(
            GroupVersionKind::new(self.group.clone(), self.version.clone(), self.kind.clone()),
            self.namespace.as_deref().unwrap_or(default_namespace),
            self.name.clone(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectSpec {
    /// Type name registered for the kind. Defaults to the kind.
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub group: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    /// Owned objects get the resource's owner reference.
    #[serde(default = "default_true")]
    pub owned: bool,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Job-like object with an embedded pod template.
    #[serde(default)]
    pub pod_template: bool,
    /// Field owner used when seeding `existing` objects.
    #[serde(default = "default_seed_owner")]
    pub owner: String,
}

impl ObjectSpec {
    fn kind(&self) -> GroupVersionKind {
        GroupVersionKind::new(self.group.clone(), self.version.clone(), self.kind.clone())
    }

    fn type_name(&self) -> &str {
        self.type_name.as_deref().unwrap_or(&self.kind)
    }

    fn to_desired(&self, default_namespace: &str) -> DesiredObject {
        let mut meta = ObjectMeta::named(
            self.namespace.as_deref().unwrap_or(default_namespace),
            self.name.clone(),
        );
        meta.labels.clone_from(&self.labels);
        let object = DesiredObject::with_type_name(self.type_name(), meta, self.body.clone());
        if self.pod_template {
            object.with_pod_template()
        } else {
            object
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_group() -> String {
    "steward.dev".to_string()
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Application".to_string()
}

fn default_seed_owner() -> String {
    "user".to_string()
}

const fn default_true() -> bool {
    true
}

impl Scenario {
    pub fn from_toml_str(text: &str) -> Result<Self, HarnessError> {
        let scenario: Self = toml::from_str(text).map_err(|e| HarnessError::Scenario(e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        Self::from_toml_str(&read_input(path)?)
    }

    fn validate(&self) -> Result<(), HarnessError> {
        if self.resource.name.trim().is_empty() {
            return Err(HarnessError::Scenario("resource.name must not be empty".into()));
        }
        let mut seen = BTreeSet::new();
        for component in &self.components {
            if component.name.trim().is_empty() {
                return Err(HarnessError::Scenario("component name must not be empty".into()));
            }
            if !seen.insert(component.name.as_str()) {
                return Err(HarnessError::Scenario(format!(
                    "duplicate component {:?}",
                    component.name
                )));
            }
        }
        for object in self.objects.iter().chain(&self.existing) {
            if object.name.trim().is_empty() || object.kind.trim().is_empty() {
                return Err(HarnessError::Scenario("objects need a kind and a name".into()));
            }
        }
        let owns_objects = self.objects.iter().any(|o| o.owned);
        if owns_objects && self.resource.uid.is_none() {
            return Err(HarnessError::Scenario(
                "resource.uid is required when objects are owned".into(),
            ));
        }
        self.registry()?;
        Ok(())
    }

    /// Type registry for the planned objects. One type name maps to one kind.
    fn registry(&self) -> Result<TypeRegistry, HarnessError> {
        let mut registry = TypeRegistry::new();
        for object in &self.objects {
            let kind = object.kind();
            if let Some(registered) = registry.kind_of(object.type_name()).filter(|k| **k != kind) {
                return Err(HarnessError::Scenario(format!(
                    "type {:?} is used for both {registered} and {kind}",
                    object.type_name()
                )));
            }
            registry.register_name(object.type_name(), kind);
        }
        Ok(registry)
    }
}

// =============================================================================
// MANAGED RESOURCE
// =============================================================================

#[derive(Debug, Clone)]
pub struct ScenarioResource {
    kind: GroupVersionKind,
    pub meta: ObjectMeta,
    pub status: StandardStatus,
}

impl ScenarioResource {
    fn from_spec(spec: &ResourceSpec, prior: &[PriorCondition], now: DateTime<Utc>) -> Self {
        let mut meta = ObjectMeta::named(spec.namespace.clone(), spec.name.clone());
        meta.uid.clone_from(&spec.uid);
        meta.labels.clone_from(&spec.labels);
        meta.annotations.clone_from(&spec.annotations);

        let conditions = prior
            .iter()
            .map(|c| {
                let age = TimeDelta::from_std(Duration::from_secs(c.age_secs)).unwrap_or(TimeDelta::MAX);
                let since = now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC);
                Condition::new(c.condition_type.clone(), c.status, c.reason.clone(), c.message.clone(), since)
            })
            .collect();

        Self {
            kind: GroupVersionKind::new(spec.group.clone(), spec.version.clone(), spec.kind.clone()),
            meta,
            status: StandardStatus {
                status: None,
                conditions,
            },
        }
    }

    #[must_use]
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

impl ManagedResource for ScenarioResource {
    type Status = StandardStatus;

    fn kind(&self) -> GroupVersionKind {
        self.kind.clone()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn status(&self) -> &StandardStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut StandardStatus {
        &mut self.status
    }
}

// =============================================================================
// RECONCILER
// =============================================================================

/// Replays the scenario's components and objects every reconcile.
#[derive(Debug, Clone)]
pub struct ScenarioReconciler {
    components: Vec<ComponentSpec>,
    objects: Vec<ObjectSpec>,
    deletes: Vec<RefSpec>,
    requeue_after: Option<Duration>,
}

/// Component health composed from the scenario.
#[derive(Debug, Clone)]
pub struct ScenarioObservation {
    health: Vec<ComponentHealth>,
}

impl Observation for ScenarioObservation {
    fn component_health(&self) -> Vec<ComponentHealth> {
        self.health.clone()
    }
}

impl ScenarioReconciler {
    #[must_use]
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            components: scenario.components.clone(),
            objects: scenario.objects.clone(),
            deletes: scenario.deletes.clone(),
            requeue_after: scenario.requeue_after_secs.map(Duration::from_secs),
        }
    }

    fn compose_component(spec: &ComponentSpec, watched: Option<&FetchResult<()>>) -> ComponentHealth {
        let found = |_: &()| ComponentHealth::new(spec.name.as_str());
        let mut health = match watched {
            Some(result) => match spec.dependency {
                DependencyType::Upstream => result.to_upstream_health(&spec.name, found),
                DependencyType::Downstream => result.to_downstream_health(&spec.name, found),
                DependencyType::Unspecified => result.to_component_health(&spec.name, found),
            },
            None => ComponentHealth::new(spec.name.as_str()),
        };
        health.dependency_type = spec.dependency;

        match spec.state {
            Some(state) => {
                let reason = spec.reason.clone().unwrap_or_else(|| state.as_str().to_string());
                let message = spec
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} is {state}", spec.name));
                health = health.with_state(state, &reason, &message);
            }
            None => {
                health.reason.clone_from(&spec.reason);
                health.message.clone_from(&spec.message);
            }
        }

        for error in &spec.errors {
            health = health.with_error(error.to_failure());
        }
        health
    }
}

impl DomainReconciler<MemoryCluster> for ScenarioReconciler {
    type Resource = ScenarioResource;
    type Fetched = Vec<Option<FetchResult<()>>>;
    type Observation = ScenarioObservation;

    fn fetch_remote_state(
        &self,
        client: &MemoryCluster,
        ctx: &ReconcileContext<'_, ScenarioResource>,
    ) -> Result<Self::Fetched, Failure> {
        let namespace = ctx.resource.meta.namespace.as_str();
        Ok(self
            .components
            .iter()
            .map(|spec| {
                spec.watch
                    .as_ref()
                    .map(|watch| FetchResult::from(client.get(&watch.to_ref(namespace)).map(|_| ())))
            })
            .collect())
    }

    fn compose_state(
        &self,
        _ctx: &ReconcileContext<'_, ScenarioResource>,
        fetched: Self::Fetched,
    ) -> ScenarioObservation {
        let health = self
            .components
            .iter()
            .zip(&fetched)
            .map(|(spec, watched)| Self::compose_component(spec, watched.as_ref()))
            .collect();
        ScenarioObservation { health }
    }

    fn plan_resources(
        &self,
        ctx: &ReconcileContext<'_, ScenarioResource>,
        _observation: &ScenarioObservation,
    ) -> PlanResult {
        let namespace = ctx.resource.meta.namespace.as_str();
        let mut plan = PlanResult::new();
        for spec in &self.objects {
            let object = spec.to_desired(namespace);
            if spec.owned {
                plan.apply(object);
            } else {
                plan.apply_without_owner_ref(object);
            }
        }
        for target in &self.deletes {
            plan.delete(target.to_ref(namespace));
        }
        if let Some(delay) = self.requeue_after {
            plan.requeue_after(delay);
        }

        let managed_by = &ctx.config.managed_by_label;
        let labels = BTreeMap::from([(managed_by.clone(), ctx.config.field_owner.clone())]);
        apply_controller_labels(&mut plan, &labels, managed_by);
        plan
    }
}

// =============================================================================
// RUNNER
// =============================================================================

/// One line of an event, for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventLine {
    pub level: &'static str,
    pub reason: String,
    pub message: String,
}

impl From<RecordedEvent> for EventLine {
    fn from(event: RecordedEvent) -> Self {
        let level = match event.level {
            EventLevel::Normal => "Normal",
            EventLevel::Warning => "Warning",
        };
        Self {
            level,
            reason: event.reason,
            message: event.message,
        }
    }
}

/// Result of one reconcile step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub iteration: u32,
    pub at: DateTime<Utc>,
    pub outcome: String,
    /// True when a controller would requeue with backoff.
    pub retriable: bool,
    pub status: Option<Status>,
    pub conditions: Vec<Condition>,
    pub events: Vec<EventLine>,
    pub applied: Vec<String>,
}

impl Report {
    /// Human-readable rendering.
    #[must_use]
    pub fn render_text(&self) -> String {
        let status = self.status.map_or("-", Status::as_str);
        let mut out = format!(
            "#{} at {} status={} outcome={}\n",
            self.iteration,
            self.at.to_rfc3339(),
            status,
            self.outcome
        );
        for c in &self.conditions {
            out.push_str(&format!(
                "  {:<28} {:<7} {:<28} {}\n",
                c.condition_type,
                c.status.as_str(),
                c.reason,
                c.message
            ));
        }
        for e in &self.events {
            out.push_str(&format!("  event {} {}: {}\n", e.level, e.reason, e.message));
        }
        for a in &self.applied {
            out.push_str(&format!("  applied {a}\n"));
        }
        out
    }
}

/// A scenario wired to a pipeline, ready to be stepped.
pub struct ScenarioRun {
    pipeline: Pipeline<ScenarioReconciler, MemoryCluster>,
    resource: ScenarioResource,
    recorder: Arc<MemoryRecorder>,
    clock: Arc<ManualClock>,
    cancel: CancellationToken,
    iteration: u32,
    applied_seen: usize,
}

impl ScenarioRun {
    /// Seed the cluster and build the pipeline. `start` is the first reconcile time.
    pub fn new(scenario: &Scenario, config: EngineConfig, start: DateTime<Utc>) -> Result<Self, HarnessError> {
        let namespace = scenario.resource.namespace.as_str();
        let mut cluster = MemoryCluster::new();
        for spec in &scenario.existing {
            let object = spec.to_desired(namespace).with_kind(spec.kind());
            cluster
                .apply(&object, &spec.owner)
                .map_err(|e| HarnessError::Scenario(format!("seeding {}: {e}", spec.name)))?;
        }
        let applied_seen = cluster.applied().len();

        let clock = Arc::new(ManualClock::new(start));
        let recorder = Arc::new(MemoryRecorder::new());
        let pipeline = Pipeline::new(
            ScenarioReconciler::new(scenario),
            cluster,
            scenario.registry()?,
            config,
        )
        .with_clock(clock.clone())
        .with_recorder(recorder.clone());

        Ok(Self {
            pipeline,
            resource: ScenarioResource::from_spec(&scenario.resource, &scenario.conditions, start),
            recorder,
            clock,
            cancel: CancellationToken::new(),
            iteration: 0,
            applied_seen,
        })
    }

    /// Token that aborts the next step.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    #[must_use]
    pub fn resource(&self) -> &ScenarioResource {
        &self.resource
    }

    #[must_use]
    pub fn cluster(&self) -> &MemoryCluster {
        self.pipeline.client()
    }

    /// Reconcile once and report what happened.
    pub fn step(&mut self) -> Report {
        self.iteration += 1;
        let at = self.clock.now();
        let result = self.pipeline.run(&mut self.resource, &self.cancel);
        let (outcome, retriable) = match &result {
            Ok(ReconcileOutcome::Done) => ("done".to_string(), false),
            Ok(ReconcileOutcome::Paused) => ("paused".to_string(), false),
            Ok(ReconcileOutcome::RequeueAfter(delay)) => {
                (format!("requeue after {}s", delay.as_secs()), false)
            }
            Err(err) => (err.to_string(), err.is_retriable()),
        };
        tracing::info!(iteration = self.iteration, outcome = %outcome, "reconciled");

        let applied = self.pipeline.client().applied();
        let fresh = applied[self.applied_seen.min(applied.len())..]
            .iter()
            .map(ToString::to_string)
            .collect();
        self.applied_seen = applied.len();

        Report {
            iteration: self.iteration,
            at,
            outcome,
            retriable,
            status: self.resource.status.status,
            conditions: self.resource.status.conditions.clone(),
            events: self.recorder.take().into_iter().map(EventLine::from).collect(),
            applied: fresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_specs_build_failures() {
        let api = ErrorSpec::Api {
            reason: ApiReason::Forbidden,
            code: None,
            message: "denied".into(),
        };
        assert!(matches!(api.to_failure(), Failure::Api(ref e) if e.code == 403));

        let other = ErrorSpec::Other {
            message: "odd".into(),
        };
        assert_eq!(other.to_failure(), Failure::other("odd"));
    }

    #[test]
    fn missing_uid_with_owned_objects_is_rejected() {
        let text = r#"
            [resource]
            name = "app"

            [[objects]]
            kind = "ConfigMap"
            name = "cm"
        "#;
        assert!(matches!(Scenario::from_toml_str(text), Err(HarnessError::Scenario(_))));
    }

    #[test]
    fn one_type_name_maps_to_one_kind() {
        let text = r#"
            [resource]
            name = "app"
            uid = "u1"

            [[objects]]
            type = "Settings"
            kind = "ConfigMap"
            name = "a"

            [[objects]]
            type = "Settings"
            kind = "Secret"
            name = "b"
        "#;
        let err = Scenario::from_toml_str(text).expect_err("conflicting kinds");
        assert!(matches!(err, HarnessError::Scenario(ref msg) if msg.contains("\"Settings\"")));

        let shared = text.replace("kind = \"Secret\"", "kind = \"ConfigMap\"");
        let scenario = Scenario::from_toml_str(&shared).expect("same kind twice");
        let registry = scenario.registry().expect("registry");
        assert_eq!(registry.kind_of("Settings").map(|k| k.kind.as_str()), Some("ConfigMap"));
    }
}
