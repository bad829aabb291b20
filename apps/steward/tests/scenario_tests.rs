//! # Scenario Tests
//!
//! Scenario files driven through the harness runner.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use steward::{HarnessError, Scenario, ScenarioRun};
use steward_core::{
    CONDITION_CONFIG_VALID, CONDITION_DEPENDENCIES_REACHABLE, CONDITION_READY, EngineConfig,
    GroupVersionKind, ObjectRef, Status,
};

fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp")
}

fn run_of(text: &str) -> ScenarioRun {
    let scenario = Scenario::from_toml_str(text).expect("scenario parses");
    ScenarioRun::new(&scenario, EngineConfig::default(), t0()).expect("scenario seeds")
}

const SHOP: &str = r#"
[resource]
name = "shop"
namespace = "retail"
uid = "uid-shop"

[[components]]
name = "Database"
dependency = "upstream"
watch = { kind = "Secret", name = "db-creds" }

[[objects]]
kind = "ConfigMap"
name = "shop-settings"
body = { data = { mode = "prod" } }
"#;

fn settings_ref() -> ObjectRef {
    ObjectRef::new(GroupVersionKind::new("", "v1", "ConfigMap"), "retail", "shop-settings")
}

// =============================================================================
// UPSTREAM DEPENDENCIES
// =============================================================================

#[test]
fn missing_upstream_blocks_apply() {
    let mut run = run_of(SHOP);

    let report = run.step();

    assert_eq!(report.outcome, "done");
    assert!(!report.retriable);
    assert_eq!(report.status, Some(Status::Failed));
    assert!(report.applied.is_empty());
    let config = run.resource().condition(CONDITION_CONFIG_VALID).expect("config");
    assert!(config.is_false());
    assert_eq!(config.reason, "MissingRef");
}

#[test]
fn present_upstream_converges_and_applies() {
    let text = format!(
        "{SHOP}\n[[existing]]\nkind = \"Secret\"\nname = \"db-creds\"\nbody = {{ data = {{ password = \"x\" }} }}\n"
    );
    let mut run = run_of(&text);

    let report = run.step();

    assert_eq!(report.outcome, "done");
    assert_eq!(report.status, Some(Status::Ready));
    assert_eq!(report.applied, vec!["ConfigMap retail/shop-settings".to_string()]);
    assert!(run.resource().condition("DatabaseReady").expect("database").is_true());

    let stored = run.cluster().get(&settings_ref()).expect("stored");
    assert_eq!(stored.field("data.mode"), Some(&json!("prod")));
    assert_eq!(
        stored.field("metadata.labels.app.kubernetes.io/managed-by"),
        Some(&json!("steward"))
    );
    assert_eq!(stored.owner_of("data.mode"), Some("steward"));
    assert_eq!(stored.metadata.owner_references.len(), 1);
}

#[test]
fn events_are_reported_once_per_step() {
    let text = format!("{SHOP}\n[[existing]]\nkind = \"Secret\"\nname = \"db-creds\"\n");
    let mut run = run_of(&text);

    let first = run.step();
    assert!(first.events.iter().any(|e| e.level == "Normal" && e.reason == "ReadyAllComponentsReady"));

    run.advance(Duration::from_secs(5));
    let second = run.step();
    assert_eq!(second.iteration, 2);
    assert!(second.events.is_empty(), "no transitions, no events");
    assert!(second.applied.iter().all(|a| a.contains("shop-settings")));
}

// =============================================================================
// GRACE PERIOD
// =============================================================================

const FLAKY_CACHE: &str = r#"
[resource]
name = "shop"

[[conditions]]
type = "CacheReady"
status = "True"
reason = "Warm"
message = "cache is warm"
age_secs = 600

[[components]]
name = "Cache"
errors = [{ kind = "api", reason = "ServiceUnavailable", message = "cache down" }]
"#;

#[test]
fn transient_failure_is_held_then_degrades() {
    let mut run = run_of(FLAKY_CACHE);

    let first = run.step();
    assert!(first.retriable);
    let cache = run.resource().condition("CacheReady").expect("cache");
    assert!(cache.is_true(), "held during grace period");
    let reachable = run.resource().condition(CONDITION_DEPENDENCIES_REACHABLE).expect("reachable");
    assert!(reachable.is_false());

    run.advance(Duration::from_secs(15));
    let second = run.step();
    assert!(second.retriable);
    assert_eq!(second.status, Some(Status::Degraded));
    let cache = run.resource().condition("CacheReady").expect("cache");
    assert!(cache.is_false());
    assert_eq!(cache.reason, "ServiceUnavailable");
    assert!(run.resource().condition(CONDITION_READY).expect("ready").is_false());
}

// =============================================================================
// FIELD OWNERSHIP AND RUN CONTROL
// =============================================================================

#[test]
fn existing_foreign_fields_survive() {
    let text = format!(
        "{SHOP}\n[[existing]]\nkind = \"Secret\"\nname = \"db-creds\"\n\n\
         [[existing]]\nkind = \"ConfigMap\"\nname = \"shop-settings\"\nowner = \"kubectl\"\n\
         body = {{ data = {{ mode = \"debug\" }} }}\n"
    );
    let mut run = run_of(&text);

    run.step();

    let stored = run.cluster().get(&settings_ref()).expect("stored");
    assert_eq!(stored.field("data.mode"), Some(&json!("debug")));
    assert_eq!(stored.owner_of("data.mode"), Some("kubectl"));
}

#[test]
fn cancelled_step_changes_nothing() {
    let mut run = run_of(SHOP);
    run.cancel_token().cancel();

    let report = run.step();

    assert!(!report.retriable);
    assert!(report.conditions.is_empty());
    assert!(report.status.is_none());
}

#[test]
fn requeue_and_pause_are_reported() {
    let mut run = run_of("requeue_after_secs = 30\n[resource]\nname = \"idle\"\n");
    assert_eq!(run.step().outcome, "requeue after 30s");

    let mut paused = run_of(
        "[resource]\nname = \"idle\"\nannotations = { \"steward.dev/paused\" = \"true\" }\n",
    );
    assert_eq!(paused.step().outcome, "paused");
}

#[test]
fn json_report_uses_camel_case() {
    let mut run = run_of("[resource]\nname = \"idle\"\n");
    let value = serde_json::to_value(run.step()).expect("encodes");
    assert_eq!(value["iteration"], json!(1));
    assert_eq!(value["status"], json!("Ready"));
    assert!(value["conditions"].is_array());
    assert!(value.get("retriable").is_some());
}

// =============================================================================
// LOADING
// =============================================================================

#[test]
fn load_reads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(SHOP.as_bytes()).expect("write");

    let scenario = Scenario::load(file.path()).expect("loads");

    assert_eq!(scenario.resource.name, "shop");
    assert_eq!(scenario.components.len(), 1);
}

#[test]
fn invalid_scenarios_are_rejected() {
    let duplicate = "[resource]\nname = \"x\"\n[[components]]\nname = \"A\"\n[[components]]\nname = \"A\"\n";
    assert!(matches!(Scenario::from_toml_str(duplicate), Err(HarnessError::Scenario(_))));

    let unknown_field = "[resource]\nname = \"x\"\ncolour = \"blue\"\n";
    assert!(matches!(Scenario::from_toml_str(unknown_field), Err(HarnessError::Scenario(_))));

    let conflicting_type = "[resource]\nname = \"x\"\nuid = \"u\"\n\
        [[objects]]\ntype = \"Cfg\"\nkind = \"ConfigMap\"\nname = \"a\"\n\
        [[objects]]\ntype = \"Cfg\"\nkind = \"Secret\"\nname = \"b\"\n";
    assert!(matches!(Scenario::from_toml_str(conflicting_type), Err(HarnessError::Scenario(_))));

    let missing = Scenario::load(std::path::Path::new("/nonexistent/scenario.toml"));
    assert!(matches!(missing, Err(HarnessError::Io { .. })));
}
