//! # Steward CLI Module
//!
//! ## Available Commands
//!
//! - `evaluate` - Reconcile a scenario once
//! - `simulate` - Reconcile a scenario repeatedly on a timer
//! - `config` - Print the effective engine configuration

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use steward::HarnessError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Steward - declarative reconciliation harness
///
/// Runs the reconcile engine against an in-memory cluster described by a
/// scenario file and prints the resulting conditions.
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "STEWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile a scenario once
    Evaluate {
        /// Scenario file (TOML)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Reconcile a scenario repeatedly
    Simulate {
        /// Scenario file (TOML)
        #[arg(short, long)]
        file: PathBuf,

        /// Number of reconciles
        #[arg(short = 'n', long, default_value = "5")]
        iterations: u32,

        /// Wall-clock delay between reconciles
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Simulated seconds that pass between reconciles
        #[arg(long, default_value = "5")]
        step_secs: u64,
    },

    /// Print the effective configuration
    Config,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), HarnessError> {
    let config = steward::load_settings(cli.config.as_deref())?;
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Evaluate { file } => cmd_evaluate(config, &file, json_mode),
        Commands::Simulate {
            file,
            iterations,
            interval_ms,
            step_secs,
        } => cmd_simulate(config, &file, json_mode, iterations, interval_ms, step_secs).await,
        Commands::Config => cmd_config(&config, json_mode),
    }
}
