//! The four-configuration scenario matrix.
//!
//! Owns the payload, generated once and shared by every scenario, and the
//! dispatch pool used by offloaded runs. The pool is created on first use
//! and shut down when the matrix is dropped.

use crate::config::Config;
use crate::error::Result;
use crate::payload::Payload;
use crate::runtime::DispatchPool;
use crate::scenario::{
    run_scenario, DispatchMode, FaultInjection, RunConfiguration, ScenarioContext, ScenarioReport,
};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

pub struct ScenarioMatrix {
    config: Config,
    payload: Payload,
    pool: OnceCell<DispatchPool>,
}

impl ScenarioMatrix {
    pub fn new(config: Config) -> Self {
        let payload = Payload::generate(config.payload_seed, config.payload_len);
        Self::with_payload(config, payload)
    }

    /// Use an already generated payload.
    pub fn with_payload(config: Config, payload: Payload) -> Self {
        info!(
            bytes = payload.len(),
            seed = payload.seed(),
            slice_seed = config.slice_seed,
            max_slice = config.max_slice,
            "Payload ready"
        );
        Self {
            config,
            payload,
            pool: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    fn pool(&self) -> Result<&DispatchPool> {
        self.pool.get_or_try_init(|| {
            debug!(workers = self.config.workers, "Starting dispatch pool");
            Ok(DispatchPool::new(self.config.workers)?)
        })
    }

    pub fn run(&self, run: RunConfiguration) -> ScenarioReport {
        self.run_inner(run, None)
    }

    /// Run with a deliberate fault injected.
    pub fn run_with_fault(&self, run: RunConfiguration, fault: FaultInjection) -> ScenarioReport {
        self.run_inner(run, Some(fault))
    }

    /// All four configurations, in order, each with fresh participants.
    pub fn run_all(&self) -> Vec<ScenarioReport> {
        RunConfiguration::ALL
            .into_iter()
            .map(|run| self.run(run))
            .collect()
    }

    fn run_inner(&self, run: RunConfiguration, fault: Option<FaultInjection>) -> ScenarioReport {
        let pool = match run.dispatch {
            DispatchMode::Inline => None,
            DispatchMode::Offloaded => match self.pool() {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!(error = %e, "Dispatch pool failed to start");
                    None
                }
            },
        };
        let ctx = ScenarioContext {
            config: &self.config,
            payload: &self.payload,
            pool,
            fault,
        };
        run_scenario(&ctx, run)
    }

    pub fn shutdown(&self) {
        if let Some(pool) = self.pool.get() {
            pool.shutdown();
        }
    }
}

impl Drop for ScenarioMatrix {
    fn drop(&mut self) {
        self.shutdown();
    }
}
