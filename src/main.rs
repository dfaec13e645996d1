//! echo-harness runner
//!
//! Runs the scenario matrix (or a single scenario) against the loopback
//! transport and exits with an error if any scenario failed.

use echo_harness::{Config, HarnessError, ScenarioMatrix};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        payload_len = config.payload_len,
        payload_seed = config.payload_seed,
        slice_seed = config.slice_seed,
        deadline_ms = config.deadline.as_millis() as u64,
        workers = config.workers,
        "Starting echo harness"
    );

    let scenario = config.scenario;
    let matrix = ScenarioMatrix::new(config);
    let reports = match scenario {
        Some(run) => vec![matrix.run(run)],
        None => matrix.run_all(),
    };
    matrix.shutdown();

    let failed: Vec<_> = reports.iter().filter(|r| !r.passed()).collect();
    info!(
        scenarios = reports.len(),
        passed = reports.len() - failed.len(),
        failed = failed.len(),
        "Harness finished"
    );

    match failed.first() {
        None => Ok(()),
        Some(first) => {
            for report in &failed {
                error!(scenario = %report.run, "Failed");
            }
            let cause = match &first.outcome {
                Err(e) => e.clone(),
                Ok(()) => HarnessError::Harness("failed report without a cause".to_string()),
            };
            Err(cause.into())
        }
    }
}
