//! # Settings Tests

use std::collections::HashMap;
use std::io::Write;
use steward::settings::{ENV_FIELD_OWNER, ENV_GRACE_PERIOD_SECS, ENV_UNKNOWN_ESCALATION_SECS};
use steward::{HarnessError, apply_env_overrides, load_settings};
use steward_core::EngineConfig;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn no_overrides_keeps_defaults() {
    let config = apply_env_overrides(EngineConfig::default(), env(&[])).expect("defaults");
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn overrides_replace_file_values() {
    let config = apply_env_overrides(
        EngineConfig::default(),
        env(&[
            (ENV_FIELD_OWNER, "platform-operator"),
            (ENV_GRACE_PERIOD_SECS, " 30 "),
            (ENV_UNKNOWN_ESCALATION_SECS, "120"),
        ]),
    )
    .expect("overrides");

    assert_eq!(config.field_owner, "platform-operator");
    assert_eq!(config.grace_period_secs, 30);
    assert_eq!(config.unknown_escalation_secs, Some(120));
}

#[test]
fn zero_or_empty_escalation_disables_it() {
    for raw in ["0", "", "  "] {
        let config = apply_env_overrides(EngineConfig::default(), env(&[(ENV_UNKNOWN_ESCALATION_SECS, raw)]))
            .expect("disables");
        assert_eq!(config.unknown_escalation_secs, None, "value {raw:?}");
    }
}

#[test]
fn bad_values_are_reported_by_name() {
    let err = apply_env_overrides(EngineConfig::default(), env(&[(ENV_GRACE_PERIOD_SECS, "ten")]))
        .expect_err("not a number");
    assert!(matches!(err, HarnessError::Setting { name, .. } if name == ENV_GRACE_PERIOD_SECS));

    let err = apply_env_overrides(EngineConfig::default(), env(&[(ENV_FIELD_OWNER, " ")]))
        .expect_err("empty owner");
    assert!(matches!(err, HarnessError::Setting { name, .. } if name == ENV_FIELD_OWNER));
}

#[test]
fn settings_file_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(b"field_owner = \"from-file\"\ngrace_period_secs = 20\n")
        .expect("write");

    let config = load_settings(Some(file.path())).expect("loads");

    // The process environment may override either value.
    if std::env::var(ENV_FIELD_OWNER).is_err() {
        assert_eq!(config.field_owner, "from-file");
    }
    if std::env::var(ENV_GRACE_PERIOD_SECS).is_err() {
        assert_eq!(config.grace_period_secs, 20);
    }
}

#[test]
fn malformed_settings_file_is_an_engine_error() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(b"grace_period_secs = \"soon\"\n").expect("write");

    assert!(matches!(load_settings(Some(file.path())), Err(HarnessError::Engine(_))));
}
