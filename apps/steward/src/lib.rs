//! # Steward Harness
//!
//! Library half of the `steward` binary: reconcile scenarios loaded from TOML,
//! run against the in-memory cluster, and the layered engine settings.

pub mod scenario;
pub mod settings;

use std::path::{Path, PathBuf};
use steward_core::StewardError;
use thiserror::Error;

pub use scenario::{Report, Scenario, ScenarioReconciler, ScenarioResource, ScenarioRun};
pub use settings::{apply_env_overrides, load_settings};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scenario: {0}")]
    Scenario(String),

    #[error("invalid setting {name}: {reason}")]
    Setting { name: &'static str, reason: String },

    #[error(transparent)]
    Engine(#[from] StewardError),

    #[error("encoding output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Maximum size of a scenario or config file (1 MiB).
pub const MAX_INPUT_FILE_SIZE: u64 = 1024 * 1024;

/// Read a UTF-8 input file, rejecting oversized ones.
pub fn read_input(path: &Path) -> Result<String, HarnessError> {
    let io_err = |source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    };
    let metadata = std::fs::metadata(path).map_err(io_err)?;
    if metadata.len() > MAX_INPUT_FILE_SIZE {
        return Err(HarnessError::Scenario(format!(
            "{} is {} bytes, limit is {MAX_INPUT_FILE_SIZE}",
            path.display(),
            metadata.len()
        )));
    }
    std::fs::read_to_string(path).map_err(io_err)
}
