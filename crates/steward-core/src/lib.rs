//! # steward-core
//!
//! The declarative reconciliation engine for Steward.
//!
//! One reconcile drives a managed resource toward its desired state:
//! fetch remote facts, compose them into component health, plan desired
//! objects, derive conditions and status, then apply only when nothing
//! blocks convergence.
//!
//! ## Architectural Constraints
//!
//! - No async and no network: clients are traits the caller implements
//! - Deterministic: conditions keep insertion order, apply order is sorted
//! - Nothing survives a reconcile except the written status
//! - Domain code plugs in only through [`DomainReconciler`] and [`Observation`]

// =============================================================================
// MODULES
// =============================================================================

pub mod apply;
pub mod clock;
pub mod conditions;
pub mod config;
pub mod grace;
pub mod health;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod state_engine;
pub mod taxonomy;
pub mod types;
pub mod workload;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    CONDITION_AUTH_VALID, CONDITION_CONFIG_VALID, CONDITION_DEPENDENCIES_REACHABLE,
    CONDITION_READY, Condition, ConditionStatus, DependencyType, GroupVersionKind, ObjectMeta,
    ObjectRef, OwnerReference, Status, StewardError,
};

// =============================================================================
// RE-EXPORTS: Errors & Health
// =============================================================================

pub use health::{ChildRef, ComponentHealth, FetchResult, LogSource, Observation};
pub use taxonomy::{
    ApiError, ApiReason, CategorizedError, ErrorCategory, Failure, InfrastructureError,
    TransportError, TransportKind, categorize,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use apply::{ApplyClient, ApplyReport, DesiredObject, PlanResult, TypeRegistry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conditions::{ConditionStore, ConditionTransition, StatusHelper};
pub use config::{EngineConfig, LabelPropagation};
pub use grace::GracePeriod;
pub use memory::{MemoryCluster, StaticLogs};
pub use observability::{EventLevel, EventRecorder, MemoryRecorder, NullRecorder, ObservabilityPolicy};
pub use pipeline::{
    CancellationToken, DomainReconciler, ManagedResource, Pipeline, PipelineError,
    ReconcileContext, ReconcileOutcome, ResourceStatus, StandardStatus, StatusWriter,
};
pub use state_engine::{StateDecision, StateEngine};
