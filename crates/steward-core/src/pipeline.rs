//! # Reconciliation Pipeline
//!
//! Orchestrates one reconcile of one managed resource:
//!
//! ```text
//! FetchRemoteState -> ComposeState -> PlanResources -> StateEngine
//!     -> {Delete, Apply} -> EmitObservability -> PersistStatus
//! ```
//!
//! ## Contract
//!
//! - Paused resources are skipped entirely.
//! - Only an unreachable fetch aborts early. Semantic problems travel as
//!   component health errors.
//! - Apply runs only when the state engine allows it. Apply failures fold
//!   into `DependenciesReachable=False` and `Ready=False`, and status is
//!   still persisted.
//! - A conflicting status write is swallowed; other write errors surface.
//! - Cancellation is checked between phases; a cancelled run writes nothing.

use crate::apply::{
    ApplyClient, ApplyFailure, ApplyPhase, PlanResult, TypeRegistry, apply_desired_state,
    prepare_objects,
};
use crate::clock::{Clock, SystemClock};
use crate::conditions::{ConditionStore, diff_transitions};
use crate::config::EngineConfig;
use crate::health::{LogSource, Observation};
use crate::observability::{EventRecorder, NullRecorder, ObservabilityPolicy, emit_observability};
use crate::state_engine::{StateDecision, StateEngine};
use crate::taxonomy::{CategorizedError, Failure, InfrastructureError};
use crate::types::{
    CONDITION_DEPENDENCIES_REACHABLE, CONDITION_READY, Condition, GroupVersionKind, ObjectMeta,
    ObjectRef, OwnerReference, Status, StewardError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const REASON_APPLY_FAILED: &str = "ApplyFailed";
pub const REASON_DELETE_FAILED: &str = "DeleteFailed";

// =============================================================================
// RESOURCE SHAPE
// =============================================================================

/// Status subresource the pipeline can read and write.
pub trait ResourceStatus: Clone + PartialEq {
    fn conditions(&self) -> &[Condition];
    fn set_conditions(&mut self, conditions: Vec<Condition>);
    fn set_status(&mut self, status: Status);
}

/// Conditions plus a single status value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ResourceStatus for StandardStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn set_conditions(&mut self, conditions: Vec<Condition>) {
        self.conditions = conditions;
    }

    fn set_status(&mut self, status: Status) {
        self.status = Some(status);
    }
}

/// A resource reconciled by the pipeline.
pub trait ManagedResource {
    type Status: ResourceStatus;

    fn kind(&self) -> GroupVersionKind;
    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
    fn status(&self) -> &Self::Status;
    fn status_mut(&mut self) -> &mut Self::Status;

    fn object_ref(&self) -> ObjectRef {
        let meta = self.metadata();
        ObjectRef::new(self.kind(), meta.namespace.clone(), meta.name.clone())
    }

    /// Controller owner reference for children. Requires a UID.
    fn owner_reference(&self) -> Result<OwnerReference, StewardError> {
        let meta = self.metadata();
        let kind = self.kind();
        let uid = meta
            .uid
            .clone()
            .ok_or_else(|| StewardError::MissingOwnerUid(self.object_ref().to_string()))?;
        Ok(OwnerReference {
            api_version: kind.api_version(),
            kind: kind.kind,
            name: meta.name.clone(),
            uid,
            controller: true,
        })
    }

    /// True when `annotation` is set to `"true"`.
    fn is_paused(&self, annotation: &str) -> bool {
        self.metadata()
            .annotations
            .get(annotation)
            .is_some_and(|v| v == "true")
    }
}

/// Persists the status subresource with optimistic concurrency.
pub trait StatusWriter<R: ManagedResource> {
    /// A stale resource version yields a Conflict API error.
    fn update_status(&mut self, resource: &mut R) -> Result<(), Failure>;
}

// =============================================================================
// COLLABORATORS
// =============================================================================

/// Read-only view handed to the domain hooks.
#[derive(Debug)]
pub struct ReconcileContext<'a, R> {
    pub resource: &'a R,
    pub config: &'a EngineConfig,
    pub now: DateTime<Utc>,
}

/// Domain logic for one resource kind. `C` is the client the fetch phase reads from.
pub trait DomainReconciler<C> {
    type Resource: ManagedResource;
    type Fetched;
    type Observation: Observation;

    /// Gather external facts. `Err` means the source was unreachable and aborts the run.
    fn fetch_remote_state(
        &self,
        client: &C,
        ctx: &ReconcileContext<'_, Self::Resource>,
    ) -> Result<Self::Fetched, Failure>;

    /// Interpret fetched facts. Must not fail.
    fn compose_state(
        &self,
        ctx: &ReconcileContext<'_, Self::Resource>,
        fetched: Self::Fetched,
    ) -> Self::Observation;

    /// Desired objects. Pure: no client access.
    fn plan_resources(
        &self,
        ctx: &ReconcileContext<'_, Self::Resource>,
        observation: &Self::Observation,
    ) -> PlanResult;

    /// Add domain conditions after the generic derivation.
    fn decorate_status(
        &self,
        _status: &mut <Self::Resource as ManagedResource>::Status,
        _store: &mut ConditionStore,
        _observation: &Self::Observation,
    ) {
    }

    /// Manual mode: return a status to bypass the state engine.
    fn set_status(&self, _store: &mut ConditionStore, _observation: &Self::Observation) -> Option<Status> {
        None
    }
}

// =============================================================================
// OUTCOME & ERRORS
// =============================================================================

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Successful reconcile result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Done,
    /// Skipped because of the pause annotation.
    Paused,
    /// The domain plan asked to be called again after a delay.
    RequeueAfter(Duration),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Retriable failures; the caller should back off and retry.
    #[error(transparent)]
    Infrastructure(InfrastructureError),

    #[error("fetch failed: {0}")]
    FetchUnreachable(Failure),

    #[error("status update failed: {0}")]
    StatusWrite(Failure),

    #[error("reconcile cancelled")]
    Cancelled,

    /// Programming error, such as an unregistered desired type.
    #[error(transparent)]
    Engine(#[from] StewardError),
}

impl PipelineError {
    /// True when the caller should requeue with backoff.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Infrastructure(_) | Self::FetchUnreachable(_) | Self::StatusWrite(_))
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

pub struct Pipeline<D, C> {
    reconciler: D,
    client: C,
    registry: TypeRegistry,
    config: EngineConfig,
    engine: StateEngine,
    recorder: Arc<dyn EventRecorder>,
    clock: Arc<dyn Clock>,
    logs: Option<Arc<dyn LogSource>>,
}

impl<D, C> Pipeline<D, C>
where
    D: DomainReconciler<C>,
    C: ApplyClient + StatusWriter<D::Resource>,
{
    #[must_use]
    pub fn new(reconciler: D, client: C, registry: TypeRegistry, config: EngineConfig) -> Self {
        let engine = config.state_engine();
        Self {
            reconciler,
            client,
            registry,
            config,
            engine,
            recorder: Arc::new(NullRecorder),
            clock: Arc::new(SystemClock),
            logs: None,
        }
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enable log-based inspection in health reports.
    #[must_use]
    pub fn with_log_source(mut self, logs: Arc<dyn LogSource>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reconcile `resource` once.
    pub fn run(
        &mut self,
        resource: &mut D::Resource,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let object = resource.object_ref();
        if resource.is_paused(&self.config.pause_annotation) {
            tracing::info!(resource = %object, "reconciliation paused");
            return Ok(ReconcileOutcome::Paused);
        }

        let now = self.clock.now();
        let previous = resource.status().clone();
        let old_conditions = previous.conditions().to_vec();
        let mut store = ConditionStore::new(&old_conditions, now);

        check_cancel(cancel)?;
        let ctx = ReconcileContext {
            resource: &*resource,
            config: &self.config,
            now,
        };

        tracing::debug!(resource = %object, phase = "fetch");
        let fetched = self
            .reconciler
            .fetch_remote_state(&self.client, &ctx)
            .map_err(|failure| {
                tracing::warn!(resource = %object, error = %failure, "fetch unreachable");
                PipelineError::FetchUnreachable(failure)
            })?;

        tracing::debug!(resource = %object, phase = "compose");
        let observation = self.reconciler.compose_state(&ctx, fetched);

        tracing::debug!(resource = %object, phase = "plan");
        let mut plan = self.reconciler.plan_resources(&ctx, &observation);

        tracing::debug!(resource = %object, phase = "state");
        let decision = match self.reconciler.set_status(&mut store, &observation) {
            Some(status) => StateDecision::manual(status),
            None => {
                let health = observation.component_health_with(self.logs.as_deref());
                self.engine.evaluate(&health, &mut store)
            }
        };

        let mut status = decision.status;
        let mut requeue_error = decision.requeue_error;

        if decision.should_apply {
            check_cancel(cancel)?;
            tracing::debug!(resource = %object, phase = "apply");
            let owner = if plan.to_apply.is_empty() {
                None
            } else {
                Some(resource.owner_reference()?)
            };
            let objects = prepare_objects(
                &mut plan,
                &self.registry,
                owner.as_ref(),
                &resource.metadata().labels,
                &self.config.system_label_domain,
                &self.config.label_propagation,
            )?;
            if let Err(failure) =
                apply_desired_state(&mut self.client, &self.config.field_owner, &plan.to_delete, &objects)
            {
                tracing::warn!(resource = %object, error = %failure.failure, "{}", failure.message());
                status = fold_apply_failure(&failure, status, &mut store);
                let folded = CategorizedError::infrastructure(apply_reason(failure.phase), failure.message())
                    .with_cause(failure.failure);
                requeue_error
                    .get_or_insert_with(|| InfrastructureError::new(Vec::new()))
                    .push(folded);
            }
        } else {
            tracing::debug!(resource = %object, "apply skipped: blocking errors present");
        }

        self.reconciler
            .decorate_status(resource.status_mut(), &mut store, &observation);

        check_cancel(cancel)?;
        let conditions = store.snapshot();
        let transitions = diff_transitions(&old_conditions, &conditions);
        {
            let target = resource.status_mut();
            target.set_conditions(conditions);
            target.set_status(status);
        }

        tracing::debug!(resource = %object, phase = "emit", transitions = transitions.len());
        emit_observability(self.recorder.as_ref(), &object, &store, &transitions);

        tracing::debug!(resource = %object, phase = "persist");
        if *resource.status() != previous {
            match self.client.update_status(resource) {
                Ok(()) => {}
                Err(failure) if failure.is_conflict() => {
                    tracing::debug!(resource = %object, "status write conflict; a later reconcile will retry");
                }
                Err(failure) => return Err(PipelineError::StatusWrite(failure)),
            }
        }

        if let Some(err) = requeue_error {
            tracing::debug!(resource = %object, failures = err.count, "requeue with backoff");
            return Err(PipelineError::Infrastructure(err));
        }
        Ok(plan
            .requeue_after
            .map_or(ReconcileOutcome::Done, ReconcileOutcome::RequeueAfter))
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

const fn apply_reason(phase: ApplyPhase) -> &'static str {
    match phase {
        ApplyPhase::Delete => REASON_DELETE_FAILED,
        ApplyPhase::Apply => REASON_APPLY_FAILED,
    }
}

/// Record an apply-phase failure in conditions. Returns the adjusted status.
///
/// An outage already reported on `DependenciesReachable` keeps its reason, so
/// the grace window and unclassified escalation keep aging. `Ready` always
/// names the apply failure.
fn fold_apply_failure(failure: &ApplyFailure, status: Status, store: &mut ConditionStore) -> Status {
    let reason = apply_reason(failure.phase);
    let message = failure.message();
    let outage_reported = store
        .get(CONDITION_DEPENDENCIES_REACHABLE)
        .is_some_and(|c| c.is_false() && c.reason != REASON_APPLY_FAILED && c.reason != REASON_DELETE_FAILED);
    if !outage_reported {
        store.mark_false(CONDITION_DEPENDENCIES_REACHABLE, reason, &message, ObservabilityPolicy::error());
    }
    store.mark_false(CONDITION_READY, reason, &message, ObservabilityPolicy::error());
    if status.is_ready() {
        Status::Degraded
    } else {
        status
    }
}
