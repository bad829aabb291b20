//! # CLI Command Implementations

use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use steward::{HarnessError, Report, Scenario, ScenarioRun};
use steward_core::EngineConfig;

fn print_report(report: &Report, json_mode: bool) -> Result<(), HarnessError> {
    if json_mode {
        println!("{}", serde_json::to_string(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

// =============================================================================
// EVALUATE COMMAND
// =============================================================================

/// Reconcile the scenario once.
pub fn cmd_evaluate(config: EngineConfig, file: &Path, json_mode: bool) -> Result<(), HarnessError> {
    let scenario = Scenario::load(file)?;
    let mut run = ScenarioRun::new(&scenario, config, Utc::now())?;
    let report = run.step();
    print_report(&report, json_mode)
}

// =============================================================================
// SIMULATE COMMAND
// =============================================================================

/// Reconcile the scenario `iterations` times, advancing simulated time by
/// `step_secs` between runs. Ctrl-C stops early.
pub async fn cmd_simulate(
    config: EngineConfig,
    file: &Path,
    json_mode: bool,
    iterations: u32,
    interval_ms: u64,
    step_secs: u64,
) -> Result<(), HarnessError> {
    let scenario = Scenario::load(file)?;
    let mut run = ScenarioRun::new(&scenario, config, Utc::now())?;
    let cancel = run.cancel_token();
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

    for iteration in 0..iterations {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                tracing::info!(completed = iteration, "simulation interrupted");
                break;
            }
        }
        if iteration > 0 {
            run.advance(Duration::from_secs(step_secs));
        }
        let report = run.step();
        print_report(&report, json_mode)?;
    }
    Ok(())
}

// =============================================================================
// CONFIG COMMAND
// =============================================================================

pub fn cmd_config(config: &EngineConfig, json_mode: bool) -> Result<(), HarnessError> {
    if json_mode {
        println!("{}", serde_json::to_string(config)?);
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
