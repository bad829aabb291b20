//! # Workload Health Inspectors
//!
//! Turn minimal snapshots of jobs, volume claims and pods into
//! `ComponentHealth`. Snapshots carry only the fields the inspectors read,
//! so domain code can fill them from whatever client it uses.
//!
//! Pod inspection order:
//! 1. No pods: still being created.
//! 2. Image pull errors, classified from the registry message.
//! 3. Failed pods, classified from logs first, then from the termination reason.
//! 4. Any running or succeeded pod: healthy.
//! 5. Pending, then anything else as progressing.

use crate::health::{ChildRef, ComponentHealth, LogSource};
use crate::taxonomy::CategorizedError;
use crate::types::Status;
use regex::Regex;
use std::sync::LazyLock;

/// Log lines fetched from a failed container.
const LOG_TAIL_LINES: usize = 200;
/// Lines kept as an excerpt when no pattern matched.
const EXCERPT_LINES: usize = 3;

const REASON_OOM_KILLED: &str = "OOMKilled";

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Terminal condition of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Running,
    Complete,
    Failed { reason: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub name: String,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSnapshot {
    pub name: String,
    pub phase: ClaimPhase,
    /// Message of a `ProvisioningFailed` condition, if present.
    pub provisioning_failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// A container exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub reason: String,
    pub message: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    pub name: String,
    pub init: bool,
    pub waiting_reason: Option<String>,
    pub waiting_message: Option<String>,
    pub terminated: Option<Termination>,
}

impl ContainerSnapshot {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init: false,
            waiting_reason: None,
            waiting_message: None,
            terminated: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    pub pod: ChildRef,
    pub phase: PodPhase,
    pub reason: Option<String>,
    pub containers: Vec<ContainerSnapshot>,
}

// =============================================================================
// JOBS & CLAIMS
// =============================================================================

/// Health of a job. Missing means not created yet.
#[must_use]
pub fn job_health(job: Option<&JobSnapshot>) -> ComponentHealth {
    let Some(job) = job else {
        return ComponentHealth::new("Job")
            .with_error(CategorizedError::missing_downstream("JobNotFound", "Job not found"));
    };
    match &job.outcome {
        JobOutcome::Complete => ComponentHealth::new("Job"),
        JobOutcome::Running => {
            ComponentHealth::new("Job").with_state(Status::Progressing, "JobRunning", "Job is in progress")
        }
        JobOutcome::Failed { reason, message } => {
            let message = if message.is_empty() { "Job failed" } else { message.as_str() };
            let err = match reason.as_str() {
                "BackoffLimitExceeded" => CategorizedError::invalid_spec("JobBackoffLimitExceeded", message),
                "DeadlineExceeded" => CategorizedError::invalid_spec("JobDeadlineExceeded", message),
                "Evicted" => CategorizedError::infrastructure("JobEvicted", message),
                _ => CategorizedError::invalid_spec("JobFailed", message),
            };
            ComponentHealth::new("Job").with_error(err)
        }
    }
}

/// Health of a persistent volume claim.
#[must_use]
pub fn volume_claim_health(claim: Option<&ClaimSnapshot>) -> ComponentHealth {
    let Some(claim) = claim else {
        return ComponentHealth::new("Claim")
            .with_error(CategorizedError::missing_downstream("PvcNotFound", "PVC not found"));
    };
    match claim.phase {
        ClaimPhase::Bound => ComponentHealth::new("Claim"),
        ClaimPhase::Lost => ComponentHealth::new("Claim").with_error(CategorizedError::infrastructure(
            "PvcLost",
            "PVC lost its underlying volume",
        )),
        ClaimPhase::Pending => match &claim.provisioning_failure {
            Some(message) => ComponentHealth::new("Claim").with_error(CategorizedError::infrastructure(
                "PvcProvisioningFailed",
                format!("PVC provisioning failed: {message}"),
            )),
            None => ComponentHealth::new("Claim").with_state(Status::Progressing, "PvcPending", "PVC is pending"),
        },
    }
}

// =============================================================================
// PODS
// =============================================================================

/// Health of a set of pods. `logs` enables log-based failure classification.
#[must_use]
pub fn pods_health(pods: &[PodSnapshot], logs: Option<&dyn LogSource>) -> ComponentHealth {
    if pods.is_empty() {
        return ComponentHealth::new("Pods")
            .with_error(CategorizedError::missing_downstream("NoPods", "No pods found"));
    }

    for pod in pods {
        if let Some(err) = image_pull_error(pod) {
            return ComponentHealth::new("Pods").with_error(err).with_child(pod.pod.clone());
        }
    }

    if let Some(pod) = pods.iter().find(|p| p.phase == PodPhase::Failed) {
        return ComponentHealth::new("Pods")
            .with_error(failed_pod_error(pod, logs))
            .with_child(pod.pod.clone());
    }

    if pods
        .iter()
        .any(|p| matches!(p.phase, PodPhase::Running | PodPhase::Succeeded))
    {
        return ComponentHealth::new("Pods");
    }

    if pods.iter().any(|p| p.phase == PodPhase::Pending) {
        return ComponentHealth::new("Pods").with_state(Status::Pending, "PodsPending", "Pods are pending");
    }

    ComponentHealth::new("Pods").with_state(Status::Progressing, "PodsProgressing", "Pods are progressing")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PullErrorKind {
    Auth,
    NotFound,
    Generic,
}

const PULL_AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "authentication required",
    "authentication failed",
    "401",
    "403",
    "forbidden",
    "denied",
    "credentials",
    "authentication",
];

const PULL_NOT_FOUND_MARKERS: &[&str] = &[
    "not found",
    "404",
    "manifest unknown",
    "name unknown",
    "no such",
];

fn classify_registry_message(message: &str) -> PullErrorKind {
    let lower = message.to_lowercase();
    if PULL_AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        PullErrorKind::Auth
    } else if PULL_NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        PullErrorKind::NotFound
    } else {
        PullErrorKind::Generic
    }
}

fn image_pull_error(pod: &PodSnapshot) -> Option<CategorizedError> {
    // Regular containers before init containers.
    let ordered = pod
        .containers
        .iter()
        .filter(|c| !c.init)
        .chain(pod.containers.iter().filter(|c| c.init));
    for container in ordered {
        let pulling = matches!(
            container.waiting_reason.as_deref(),
            Some("ImagePullBackOff" | "ErrImagePull")
        );
        if !pulling {
            continue;
        }
        let message = container.waiting_message.as_deref().unwrap_or_default();
        let detail = format!("Container {}: {}", container.name, message);
        return Some(match classify_registry_message(message) {
            PullErrorKind::Auth => CategorizedError::auth("ImagePullAuthFailure", detail),
            PullErrorKind::NotFound => CategorizedError::missing_upstream("ImageNotFound", detail),
            PullErrorKind::Generic => CategorizedError::infrastructure("ImagePullBackOff", detail),
        });
    }
    None
}

fn failed_pod_error(pod: &PodSnapshot, logs: Option<&dyn LogSource>) -> CategorizedError {
    let mut reason = String::new();
    let mut message = String::new();
    let mut inspect: Option<&str> = None;

    let ordered = pod
        .containers
        .iter()
        .filter(|c| !c.init)
        .chain(pod.containers.iter().filter(|c| c.init));
    for container in ordered {
        let Some(term) = &container.terminated else {
            continue;
        };
        if term.exit_code == 0 {
            continue;
        }
        let label = if container.init { "Init container" } else { "Container" };
        reason.clone_from(&term.reason);
        message = format!(
            "{label} {} failed with exit code {}: {}",
            container.name, term.exit_code, term.message
        );
        if term.reason != REASON_OOM_KILLED {
            inspect = Some(container.name.as_str());
        }
        break;
    }

    if reason.is_empty() {
        reason = pod.reason.clone().unwrap_or_default();
    }
    if message.is_empty() {
        message = "Pod failed".to_string();
    }

    let mut finding = LogFinding::None;
    if let (Some(source), Some(container)) = (logs, inspect) {
        if let Ok(text) = source.tail(&pod.pod, container, LOG_TAIL_LINES) {
            let (found, excerpt) = scan_logs(&text);
            finding = found;
            if !excerpt.is_empty() {
                message = format!("{message}\n\nLog excerpt:\n{excerpt}");
            }
        }
    }

    match finding {
        LogFinding::NotFound => CategorizedError::invalid_spec(
            "SourceNotFound",
            format!("Source resource not found (404): {message}"),
        ),
        LogFinding::Auth => CategorizedError::auth(
            "AuthError",
            format!("Authentication error detected in pod logs: {message}"),
        ),
        LogFinding::StorageFull => CategorizedError::resource_exhaustion(
            "StorageFull",
            format!("Storage full error detected in pod logs: {message}"),
        ),
        LogFinding::None => match reason.as_str() {
            REASON_OOM_KILLED => CategorizedError::resource_exhaustion("PodOOMKilled", message),
            "DeadlineExceeded" => CategorizedError::invalid_spec("PodDeadlineExceeded", message),
            "Evicted" => CategorizedError::infrastructure("PodEvicted", message),
            _ => CategorizedError::invalid_spec("PodFailed", message),
        },
    }
}

// =============================================================================
// LOG SCANNING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFinding {
    NotFound,
    Auth,
    StorageFull,
    None,
}

const NOT_FOUND_PATTERNS: &[&str] = &[
    r"(?i)Repository Not Found",
    r"(?i)RepositoryNotFoundError",
    r"(?i)404.*not.*found",
    r"(?i)not.*found.*404",
    r"(?i)NoSuchKey",
    r"(?i)NoSuchBucket",
    r"(?i)model.*not.*found",
    r"(?i)file.*not.*found",
    r"(?i)s3.*404",
];

const AUTH_PATTERNS: &[&str] = &[
    r"(?i)access.*denied.*s3",
    r"(?i)s3.*403",
    r"(?i)InvalidAccessKeyId",
    r"(?i)SignatureDoesNotMatch",
    r"(?i)s3.*unauthorized",
    r"(?i)aws.*credentials.*not.*found",
    r"(?i)NoCredentialProviders",
    r"(?i)Access to model .* is restricted",
    r"(?i)Cannot access gated repo",
    r"(?i)Invalid.*token.*huggingface",
    r"(?i)huggingface.*authentication.*failed",
    r"(?i)401.*Unauthorized.*hf\.co",
    r"(?i)403.*Forbidden.*hf\.co",
];

const STORAGE_FULL_PATTERNS: &[&str] = &[
    r"(?i)no space left on device",
    r"(?i)disk.*full",
    r"(?i)ENOSPC",
    r"(?i)quota.*exceeded",
    r"(?i)storage.*full",
];

static NOT_FOUND_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(NOT_FOUND_PATTERNS));
static AUTH_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(AUTH_PATTERNS));
static STORAGE_FULL_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(STORAGE_FULL_PATTERNS));

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::error!(pattern = %pattern, error = %e, "skipping invalid log pattern");
                None
            }
        })
        .collect()
}

/// First line matching a pattern, trying patterns in order.
fn find_line<'a>(lines: &[&'a str], patterns: &[Regex]) -> Option<&'a str> {
    patterns.iter().find_map(|pattern| {
        lines
            .iter()
            .find(|line| pattern.is_match(line))
            .map(|line| line.trim())
    })
}

/// Classify logs. Not-found markers win over auth markers; storage-full is last.
///
/// Returns the finding and an excerpt: the matching line, or the last few lines.
fn scan_logs(logs: &str) -> (LogFinding, String) {
    if logs.is_empty() {
        return (LogFinding::None, String::new());
    }
    let lines: Vec<&str> = logs.lines().collect();
    let checks = [
        (LogFinding::NotFound, NOT_FOUND_REGEXES.as_slice()),
        (LogFinding::Auth, AUTH_REGEXES.as_slice()),
        (LogFinding::StorageFull, STORAGE_FULL_REGEXES.as_slice()),
    ];
    for (finding, patterns) in checks {
        if let Some(line) = find_line(&lines, patterns) {
            return (finding, line.to_string());
        }
    }
    let trimmed: Vec<&str> = logs.trim().lines().collect();
    let start = trimmed.len().saturating_sub(EXCERPT_LINES);
    (LogFinding::None, trimmed[start..].join("\n"))
}

// =============================================================================
// TESTS
// =============================================================================
