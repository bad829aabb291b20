//! # Engine Configuration
//!
//! Static knobs of the reconcile engine, loadable from TOML.
//!
//! ```toml
//! field_owner = "steward"
//! grace_period_secs = 10
//! unknown_escalation_secs = 900
//!
//! [label_propagation]
//! enabled = true
//! match_patterns = ["team-*"]
//! ```

use crate::grace::GracePeriod;
use crate::state_engine::StateEngine;
use crate::types::StewardError;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which user labels copy from a managed resource to its children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelPropagation {
    pub enabled: bool,
    /// Glob patterns over label keys. `*`, `?` and `[...]` never match `/`.
    pub match_patterns: Vec<String>,
}

impl LabelPropagation {
    /// Compiled patterns. Empty when propagation is disabled.
    pub fn active_patterns(&self) -> Result<Vec<Pattern>, StewardError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.match_patterns.iter().map(|p| compile_label_pattern(p)).collect()
    }
}

fn compile_label_pattern(pattern: &str) -> Result<Pattern, StewardError> {
    Pattern::new(pattern)
        .map_err(|e| StewardError::InvalidConfig(format!("label pattern {pattern:?}: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Field owner used for every apply.
    pub field_owner: String,
    pub grace_period_secs: u64,
    /// Window after which unclassified failures stop being retried. `None` retries forever.
    pub unknown_escalation_secs: Option<u64>,
    /// Labels under `{system_label_domain}/` always propagate.
    pub system_label_domain: String,
    pub managed_by_label: String,
    /// Annotation that, set to `"true"`, skips reconciliation.
    pub pause_annotation: String,
    pub label_propagation: LabelPropagation,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            field_owner: "steward".to_string(),
            grace_period_secs: 10,
            unknown_escalation_secs: Some(900),
            system_label_domain: "steward.dev".to_string(),
            managed_by_label: "app.kubernetes.io/managed-by".to_string(),
            pause_annotation: "steward.dev/paused".to_string(),
            label_propagation: LabelPropagation::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, StewardError> {
        let config: Self = toml::from_str(text).map_err(|e| StewardError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StewardError> {
        if self.field_owner.trim().is_empty() {
            return Err(StewardError::InvalidConfig("field_owner must not be empty".into()));
        }
        if self.system_label_domain.contains('/') {
            return Err(StewardError::InvalidConfig(format!(
                "system_label_domain {:?} must not contain '/'",
                self.system_label_domain
            )));
        }
        for pattern in &self.label_propagation.match_patterns {
            compile_label_pattern(pattern)?;
        }
        if self.label_propagation.enabled && self.label_propagation.match_patterns.is_empty() {
            tracing::warn!("label propagation enabled without match patterns; only system labels propagate");
        }
        Ok(())
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// `None` or zero disables escalation.
    #[must_use]
    pub fn unknown_escalation(&self) -> Option<Duration> {
        self.unknown_escalation_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// State engine configured from these settings.
    #[must_use]
    pub fn state_engine(&self) -> StateEngine {
        StateEngine::new(GracePeriod::new(self.grace_period()), self.unknown_escalation())
    }
}
