//! # Settings
//!
//! Engine configuration layered as defaults, then an optional TOML file, then
//! environment overrides.

use crate::{HarnessError, read_input};
use std::path::Path;
use steward_core::EngineConfig;

pub const ENV_FIELD_OWNER: &str = "STEWARD_FIELD_OWNER";
pub const ENV_GRACE_PERIOD_SECS: &str = "STEWARD_GRACE_PERIOD_SECS";
/// Empty or `0` disables escalation.
pub const ENV_UNKNOWN_ESCALATION_SECS: &str = "STEWARD_UNKNOWN_ESCALATION_SECS";

/// Effective configuration from `path` (if any) and the process environment.
pub fn load_settings(path: Option<&Path>) -> Result<EngineConfig, HarnessError> {
    let config = match path {
        Some(path) => EngineConfig::from_toml_str(&read_input(path)?)?,
        None => EngineConfig::default(),
    };
    let config = apply_env_overrides(config, |name| std::env::var(name).ok())?;
    config.validate()?;
    tracing::debug!(
        field_owner = %config.field_owner,
        grace_period_secs = config.grace_period_secs,
        "settings loaded"
    );
    Ok(config)
}

/// Apply overrides read through `lookup`. Unparseable values are errors.
pub fn apply_env_overrides<F>(mut config: EngineConfig, lookup: F) -> Result<EngineConfig, HarnessError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(owner) = lookup(ENV_FIELD_OWNER) {
        if owner.trim().is_empty() {
            return Err(HarnessError::Setting {
                name: ENV_FIELD_OWNER,
                reason: "must not be empty".into(),
            });
        }
        config.field_owner = owner;
    }

    if let Some(raw) = lookup(ENV_GRACE_PERIOD_SECS) {
        config.grace_period_secs = parse_secs(ENV_GRACE_PERIOD_SECS, &raw)?;
    }

    if let Some(raw) = lookup(ENV_UNKNOWN_ESCALATION_SECS) {
        config.unknown_escalation_secs = if raw.trim().is_empty() {
            None
        } else {
            match parse_secs(ENV_UNKNOWN_ESCALATION_SECS, &raw)? {
                0 => None,
                secs => Some(secs),
            }
        };
    }

    Ok(config)
}

fn parse_secs(name: &'static str, raw: &str) -> Result<u64, HarnessError> {
    raw.trim().parse::<u64>().map_err(|e| HarnessError::Setting {
        name,
        reason: format!("{raw:?} is not a number of seconds ({e})"),
    })
}
