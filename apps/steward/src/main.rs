//! # Steward - Reconcile Harness
//!
//! The binary for the Steward reconciliation engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                apps/steward (THE BINARY)             │
//! │                                                      │
//! │   ┌─────────────┐   ┌──────────────┐                 │
//! │   │    CLI      │──▶│  Scenario    │                 │
//! │   │   (clap)    │   │  (TOML)      │                 │
//! │   └─────────────┘   └──────┬───────┘                 │
//! │                            ▼                         │
//! │          ┌───────────────────────────────┐           │
//! │          │ steward-core Pipeline         │           │
//! │          │ over MemoryCluster            │           │
//! │          └───────────────────────────────┘           │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! steward evaluate -f demos/scenario.toml
//! steward simulate -f demos/scenario.toml -n 6 --step-secs 4
//! steward config --json-mode
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // STEWARD_LOG_FORMAT=json enables machine-parseable logs. Logs go to stderr.
    let log_format = std::env::var("STEWARD_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "steward=info,steward_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
