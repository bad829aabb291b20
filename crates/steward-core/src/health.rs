//! # Component Health Model
//!
//! Per-subsystem health reported by collaborators each reconcile.
//!
//! A `ComponentHealth` either carries an explicit `state` or a list of raw
//! failures from which the state engine derives one. Reports are produced
//! fresh every reconcile and discarded afterward.

use crate::taxonomy::{ApiError, CategorizedError, Failure};
use crate::types::{DependencyType, Status};

// =============================================================================
// COMPONENT HEALTH
// =============================================================================

/// Concrete child object a component was inspected from (pod, job, claim).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ChildRef {
    #[must_use]
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Health of one logical component of a managed resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentHealth {
    pub component: String,
    pub state: Option<Status>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub errors: Vec<Failure>,
    pub dependency_type: DependencyType,
    pub child_ref: Option<ChildRef>,
}

impl ComponentHealth {
    /// A component with no state and no errors. Derives Ready.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            state: None,
            reason: None,
            message: None,
            errors: Vec::new(),
            dependency_type: DependencyType::Unspecified,
            child_ref: None,
        }
    }

    /// Explicitly Ready.
    #[must_use]
    pub fn ready(component: impl Into<String>, reason: &str, message: &str) -> Self {
        Self::new(component).with_state(Status::Ready, reason, message)
    }

    /// Builder: set an explicit state with reason and message.
    #[must_use]
    pub fn with_state(mut self, state: Status, reason: &str, message: &str) -> Self {
        self.state = Some(state);
        self.reason = Some(reason.to_string());
        self.message = Some(message.to_string());
        self
    }

    /// Builder: append a failure.
    #[must_use]
    pub fn with_error(mut self, failure: impl Into<Failure>) -> Self {
        self.errors.push(failure.into());
        self
    }

    #[must_use]
    pub fn upstream(mut self) -> Self {
        self.dependency_type = DependencyType::Upstream;
        self
    }

    #[must_use]
    pub fn downstream(mut self) -> Self {
        self.dependency_type = DependencyType::Downstream;
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: ChildRef) -> Self {
        self.child_ref = Some(child);
        self
    }

    /// Condition type written for this component: `{component}Ready`.
    #[must_use]
    pub fn condition_type(&self) -> String {
        format!("{}Ready", self.component)
    }
}

// =============================================================================
// OBSERVATION
// =============================================================================

/// Reads container logs for deeper failure inspection.
pub trait LogSource {
    /// Last `lines` lines of `container` in `pod`.
    fn tail(&self, pod: &ChildRef, container: &str, lines: usize) -> Result<String, Failure>;
}

/// What ComposeState produces: the domain's view of the world this reconcile.
pub trait Observation {
    fn component_health(&self) -> Vec<ComponentHealth>;

    /// Variant that may read logs to refine categorization.
    fn component_health_with(&self, logs: Option<&dyn LogSource>) -> Vec<ComponentHealth> {
        let _ = logs;
        self.component_health()
    }
}

// =============================================================================
// FETCH RESULT
// =============================================================================

/// Outcome of fetching one dependency, convertible into component health.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult<T> {
    result: Result<T, Failure>,
}

impl<T> FetchResult<T> {
    #[must_use]
    pub fn ok(value: T) -> Self {
        Self { result: Ok(value) }
    }

    #[must_use]
    pub fn err(failure: impl Into<Failure>) -> Self {
        Self {
            result: Err(failure.into()),
        }
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    #[must_use]
    pub fn error(&self) -> Option<&Failure> {
        self.result.as_ref().err()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.error().is_some_and(Failure::is_not_found)
    }

    #[must_use]
    pub fn into_result(self) -> Result<T, Failure> {
        self.result
    }

    /// Health from `inspect` on success, the raw failure otherwise.
    ///
    /// The component name always wins over whatever the inspector reports.
    pub fn to_component_health<F>(&self, component: &str, inspect: F) -> ComponentHealth
    where
        F: FnOnce(&T) -> ComponentHealth,
    {
        match &self.result {
            Ok(value) => {
                let mut health = inspect(value);
                health.component = component.to_string();
                health
            }
            Err(failure) => ComponentHealth::new(component).with_error(failure.clone()),
        }
    }

    /// Like `to_component_health`, but the inspector may read logs.
    pub fn to_component_health_with<F>(
        &self,
        logs: Option<&dyn LogSource>,
        component: &str,
        inspect: F,
    ) -> ComponentHealth
    where
        F: FnOnce(&T, Option<&dyn LogSource>) -> ComponentHealth,
    {
        self.to_component_health(component, |value| inspect(value, logs))
    }

    /// Health for a user-supplied dependency. Not found blocks.
    pub fn to_upstream_health<F>(&self, component: &str, inspect: F) -> ComponentHealth
    where
        F: FnOnce(&T) -> ComponentHealth,
    {
        let health = if self.is_not_found() {
            ComponentHealth::new(component).with_error(CategorizedError::missing_upstream(
                "ReferenceNotFound",
                "Upstream dependency not found",
            ))
        } else {
            self.to_component_health(component, inspect)
        };
        health.upstream()
    }

    /// Health for a dependency this system creates. Not found is progress.
    pub fn to_downstream_health<F>(&self, component: &str, inspect: F) -> ComponentHealth
    where
        F: FnOnce(&T) -> ComponentHealth,
    {
        let health = if self.is_not_found() {
            ComponentHealth::new(component).with_error(CategorizedError::missing_downstream(
                "ResourceNotReady",
                "Downstream resource not found or being created",
            ))
        } else {
            self.to_component_health(component, inspect)
        };
        health.downstream()
    }
}

impl<T> From<Result<T, Failure>> for FetchResult<T> {
    fn from(result: Result<T, Failure>) -> Self {
        Self { result }
    }
}

impl<T> From<ApiError> for FetchResult<T> {
    fn from(err: ApiError) -> Self {
        Self::err(err)
    }
}

// =============================================================================
// TESTS
// =============================================================================
