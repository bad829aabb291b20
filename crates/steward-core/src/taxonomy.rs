//! # Error Taxonomy
//!
//! Classifies arbitrary failures into a fixed set of six categories.
//!
//! - `Failure` is whatever a collaborator or client produced.
//! - `categorize` maps a `Failure` to exactly one `CategorizedError`.
//! - `ErrorCategory` is the only input to retry/block decisions.
//!
//! Categorizing an already categorized failure returns it unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

// =============================================================================
// CATEGORIES
// =============================================================================

/// The six failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Transient: network, API server, quota. Retried via backoff.
    Infrastructure,
    /// Credentials rejected. Blocks until fixed externally.
    Auth,
    /// A user-supplied dependency does not exist. Blocks.
    MissingUpstreamDependency,
    /// Something this system creates is not there yet. Normal progress.
    MissingDownstreamDependency,
    /// The requested configuration cannot work. Blocks.
    InvalidSpec,
    /// Unclassified. Treated as Infrastructure.
    Unknown,
}

impl ErrorCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Infrastructure => "Infrastructure",
            Self::Auth => "Auth",
            Self::MissingUpstreamDependency => "MissingUpstreamDependency",
            Self::MissingDownstreamDependency => "MissingDownstreamDependency",
            Self::InvalidSpec => "InvalidSpec",
            Self::Unknown => "Unknown",
        }
    }

    /// Infrastructure and Unknown are retried by the engine.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Infrastructure | Self::Unknown)
    }

    /// Auth, InvalidSpec and MissingUpstreamDependency stop the apply phase.
    #[must_use]
    pub const fn blocks_apply(self) -> bool {
        matches!(
            self,
            Self::Auth | Self::InvalidSpec | Self::MissingUpstreamDependency
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// RAW FAILURES
// =============================================================================

/// Reason carried by a structured API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiReason {
    NotFound,
    Unauthorized,
    Forbidden,
    Invalid,
    Conflict,
    AlreadyExists,
    BadRequest,
    Timeout,
    ServerTimeout,
    ServiceUnavailable,
    InternalError,
    TooManyRequests,
    Unknown,
}

impl ApiReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::Invalid => "Invalid",
            Self::Conflict => "Conflict",
            Self::AlreadyExists => "AlreadyExists",
            Self::BadRequest => "BadRequest",
            Self::Timeout => "Timeout",
            Self::ServerTimeout => "ServerTimeout",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::InternalError => "InternalError",
            Self::TooManyRequests => "TooManyRequests",
            Self::Unknown => "Unknown",
        }
    }

    /// HTTP status code conventionally paired with this reason.
    #[must_use]
    pub const fn default_code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict | Self::AlreadyExists => 409,
            Self::Invalid => 422,
            Self::TooManyRequests => 429,
            Self::InternalError | Self::Unknown => 500,
            Self::ServiceUnavailable => 503,
            Self::Timeout | Self::ServerTimeout => 504,
        }
    }
}

impl fmt::Display for ApiReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured error returned by the cluster API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (reason={reason}, code={code})")]
pub struct ApiError {
    pub code: u16,
    pub reason: ApiReason,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(code: u16, reason: ApiReason, message: impl Into<String>) -> Self {
        Self {
            code,
            reason,
            message: message.into(),
        }
    }

    /// Error with the conventional code for `reason`.
    #[must_use]
    pub fn from_reason(reason: ApiReason, message: impl Into<String>) -> Self {
        Self::new(reason.default_code(), reason, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, ApiReason::NotFound, message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, ApiReason::Conflict, message)
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, ApiReason::Forbidden, message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, ApiReason::Unauthorized, message)
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(422, ApiReason::Invalid, message)
    }

    #[must_use]
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(503, ApiReason::ServiceUnavailable, message)
    }
}

/// Kind of transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Refused,
    Reset,
    Timeout,
    Dns,
    Other,
}

/// A network failure below the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {detail}")]
pub struct TransportError {
    pub kind: TransportKind,
    pub operation: String,
    pub detail: String,
}

impl TransportError {
    #[must_use]
    pub fn new(kind: TransportKind, operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

/// Any failure observed during a reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    #[error(transparent)]
    Categorized(#[from] CategorizedError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<Failure>,
    },

    #[error("{0}")]
    Other(String),
}

impl Failure {
    /// Wrap with a context string. Categorization sees through it.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for an unclassified failure.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// The innermost failure below any `Context` wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// API reason of the innermost failure, if it is an API error.
    #[must_use]
    pub fn api_reason(&self) -> Option<ApiReason> {
        match self.root() {
            Self::Api(err) => Some(err.reason),
            Self::Categorized(err) => err.cause.as_deref().and_then(Self::api_reason),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.api_reason() == Some(ApiReason::NotFound)
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.api_reason() == Some(ApiReason::Conflict)
    }
}

impl From<io::Error> for Failure {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused => TransportKind::Refused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportKind::Reset,
            io::ErrorKind::TimedOut => TransportKind::Timeout,
            io::ErrorKind::NotConnected | io::ErrorKind::AddrNotAvailable => TransportKind::Other,
            _ => return Self::Other(err.to_string()),
        };
        Self::Transport(TransportError::new(kind, "io", err.to_string()))
    }
}

// =============================================================================
// CATEGORIZED ERROR
// =============================================================================

/// A failure with its category decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizedError {
    pub category: ErrorCategory,
    pub reason: String,
    pub user_message: String,
    pub cause: Option<Box<Failure>>,
}

impl CategorizedError {
    #[must_use]
    pub fn new(
        category: ErrorCategory,
        reason: impl Into<String>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            reason: reason.into(),
            user_message: user_message.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn infrastructure(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Infrastructure, reason, message)
    }

    #[must_use]
    pub fn auth(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, reason, message)
    }

    #[must_use]
    pub fn missing_upstream(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::MissingUpstreamDependency, reason, message)
    }

    #[must_use]
    pub fn missing_downstream(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::MissingDownstreamDependency, reason, message)
    }

    #[must_use]
    pub fn invalid_spec(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidSpec, reason, message)
    }

    /// Out of memory, disk full and similar. Reported as Infrastructure.
    #[must_use]
    pub fn resource_exhaustion(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Infrastructure, reason, message)
    }

    #[must_use]
    pub fn unknown(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, reason, message)
    }

    /// Attach the underlying failure.
    #[must_use]
    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.reason, self.category, self.user_message)
    }
}

impl std::error::Error for CategorizedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

// =============================================================================
// CATEGORIZATION
// =============================================================================

/// Map a failure to its category. Single source of truth for category decisions.
#[must_use]
pub fn categorize(failure: &Failure) -> CategorizedError {
    match failure {
        Failure::Categorized(err) => err.clone(),
        Failure::Api(err) => categorize_api(err).with_cause(failure.clone()),
        Failure::Transport(err) => categorize_transport(err).with_cause(failure.clone()),
        Failure::Context { context, source } => {
            let mut inner = categorize(source);
            if inner.category == ErrorCategory::Unknown {
                inner.user_message = format!("{context}: {}", inner.user_message);
            }
            inner
        }
        Failure::Other(message) => {
            CategorizedError::unknown("UnknownError", message.clone()).with_cause(failure.clone())
        }
    }
}

fn categorize_api(err: &ApiError) -> CategorizedError {
    let message = err.message.clone();
    match err.reason {
        ApiReason::NotFound => CategorizedError::missing_downstream("NotFound", message),
        ApiReason::Unauthorized => CategorizedError::auth("Unauthorized", message),
        ApiReason::Forbidden => CategorizedError::auth("Forbidden", message),
        ApiReason::Invalid => CategorizedError::invalid_spec("InvalidSpec", message),
        ApiReason::Conflict => CategorizedError::invalid_spec("Conflict", message),
        ApiReason::AlreadyExists => CategorizedError::invalid_spec("AlreadyExists", message),
        ApiReason::BadRequest => CategorizedError::invalid_spec("ClientError", message),
        ApiReason::Timeout | ApiReason::ServerTimeout => {
            CategorizedError::infrastructure("Timeout", message)
        }
        ApiReason::ServiceUnavailable | ApiReason::InternalError => {
            CategorizedError::infrastructure("ServiceUnavailable", message)
        }
        ApiReason::TooManyRequests => CategorizedError::infrastructure("RateLimited", message),
        ApiReason::Unknown => match err.code {
            500..=u16::MAX => CategorizedError::infrastructure("ServerError", message),
            400..=499 => CategorizedError::invalid_spec("ClientError", message),
            _ => CategorizedError::unknown("UnknownError", err.to_string()),
        },
    }
}

fn categorize_transport(err: &TransportError) -> CategorizedError {
    let (reason, summary) = match err.kind {
        TransportKind::Refused => ("ConnectionRefused", "connection refused"),
        TransportKind::Reset => ("ConnectionReset", "connection reset"),
        TransportKind::Timeout => ("NetworkTimeout", "network timeout"),
        TransportKind::Dns => ("DNSFailure", "DNS lookup failed"),
        TransportKind::Other => ("NetworkError", "network error"),
    };
    CategorizedError::infrastructure(reason, format!("{}: {summary}", err.operation))
}

// =============================================================================
// AGGREGATE RETRY ERROR
// =============================================================================

/// Every retriable failure of one reconcile, returned to trigger backoff.
///
/// The display text depends only on the count so that backoff keys stay stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfrastructureError {
    pub count: usize,
    pub errors: Vec<CategorizedError>,
}

impl InfrastructureError {
    #[must_use]
    pub fn new(errors: Vec<CategorizedError>) -> Self {
        Self {
            count: errors.len(),
            errors,
        }
    }

    /// Append another failure.
    pub fn push(&mut self, err: CategorizedError) {
        self.errors.push(err);
        self.count = self.errors.len();
    }
}

impl fmt::Display for InfrastructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 1 {
            f.write_str("infrastructure error (1 failure)")
        } else {
            write!(f, "infrastructure errors ({} failures)", self.count)
        }
    }
}

impl std::error::Error for InfrastructureError {}

// =============================================================================
// TESTS
// =============================================================================
