//! Simulation driver
//!
//! Repeatedly asks the allocator for one deployment until the probability that
//! a fresh draw fits the most constrained node drops to the halting threshold.
//!
//! ```text
//! Unconfigured ──initialize()──► Initialized ──run()──► Running ──► Halted
//! ```
//!
//! Teardown of every requested deployment runs exactly once when `run` ends,
//! whether the threshold was reached, the shutdown future fired, or a capacity
//! query failed. The loop has no iteration bound: if capacity frees up as fast
//! as it is consumed, only the shutdown future stops it.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::allocator::{Allocator, AllocatorConfig};
use crate::config::SimulationSettings;
use crate::distribution::Distribution;
use crate::error::{ConfigError, Result};
use crate::gateway::ClusterGateway;
use crate::log::DeploymentLog;
use crate::types::SimulationState;

/// Minimum wall-clock time between two progress reports
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of a simulation driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationPhase {
    Unconfigured,
    Initialized,
    Running,
    Halted,
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    /// Allocation probability fell to the halting threshold
    ThresholdReached,
    /// The shutdown future resolved first
    Interrupted,
}

/// Result of a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub run_number: usize,
    pub deployments_succeeded: u64,
    pub deployments_failed: u64,
    pub expected_deployments: u64,
    pub allocation_probability: f64,
    pub halting_threshold: f64,
    pub halt_reason: HaltReason,
    pub elapsed_secs: f64,
}

impl SimulationSummary {
    /// Elapsed time split into (hours, minutes, seconds)
    pub fn elapsed_hms(&self) -> (u64, u64, u64) {
        let total = self.elapsed_secs.round() as u64;
        (total / 3600, total % 3600 / 60, total % 60)
    }
}

/// Rate-limited progress reporting
struct ProgressReporter {
    last: Instant,
    threshold: f64,
}

impl ProgressReporter {
    fn new(threshold: f64) -> Self {
        ProgressReporter {
            last: Instant::now(),
            threshold,
        }
    }

    fn report(&mut self, state: &SimulationState) {
        self.last = Instant::now();
        info!(
            progress_pct = state.progress_percentage(),
            succeeded = state.deployments_succeeded,
            expected = state.expected_deployments,
            failed = state.deployments_failed,
            allocation_probability = state.allocation_probability,
            halting_threshold = self.threshold,
            "Simulation progress"
        );
    }

    fn tick(&mut self, state: &SimulationState) {
        if self.last.elapsed() >= PROGRESS_INTERVAL {
            self.report(state);
        }
    }
}

/// Drives one simulation run against a cluster gateway
pub struct Simulator {
    phase: SimulationPhase,
    gateway: Arc<dyn ClusterGateway>,
    allocator: Option<Allocator>,
    state: SimulationState,
    halting_threshold: f64,
    run_number: usize,
}

impl Simulator {
    /// Create an unconfigured simulator bound to a gateway
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Simulator {
            phase: SimulationPhase::Unconfigured,
            gateway,
            allocator: None,
            state: SimulationState::default(),
            halting_threshold: 0.0,
            run_number: 0,
        }
    }

    /// Validate settings, seed the random stream and build the allocator
    ///
    /// On error the simulator keeps its previous phase and no gateway call
    /// has been made.
    pub fn initialize(&mut self, settings: &SimulationSettings, log: DeploymentLog) -> Result<()> {
        if self.phase == SimulationPhase::Running {
            return Err(ConfigError::invalid("cannot re-initialize a running simulation").into());
        }
        settings.validate()?;

        let config = AllocatorConfig {
            size: Distribution::from_config(&settings.size)?,
            offer: Distribution::from_config(&settings.offer)?,
            resource: settings.resource.clone(),
            resource_scale: settings.resource_scale,
            run_number: settings.run_number,
            gateway_timeout: settings.gateway_timeout(),
        };
        let rng = StdRng::seed_from_u64(settings.seed);

        self.allocator = Some(Allocator::new(config, Arc::clone(&self.gateway), log, rng));
        self.state = SimulationState::default();
        self.halting_threshold = settings.halting_threshold;
        self.run_number = settings.run_number;
        self.phase = SimulationPhase::Initialized;

        info!(
            run = settings.run_number,
            seed = settings.seed,
            halting_threshold = settings.halting_threshold,
            resource = %settings.resource,
            "Simulation initialized"
        );
        Ok(())
    }

    /// Run until the halting threshold is reached
    pub async fn run_to_completion(&mut self) -> Result<SimulationSummary> {
        self.run(std::future::pending()).await
    }

    /// Run until the halting threshold is reached or `shutdown` resolves
    pub async fn run<F>(&mut self, shutdown: F) -> Result<SimulationSummary>
    where
        F: Future<Output = ()>,
    {
        let allocator = match (self.phase, self.allocator.as_mut()) {
            (SimulationPhase::Initialized, Some(allocator)) => allocator,
            (SimulationPhase::Halted, _) => {
                return Err(ConfigError::invalid("simulation already halted, call initialize() again").into());
            }
            _ => return Err(ConfigError::invalid("call initialize() before run()").into()),
        };

        self.phase = SimulationPhase::Running;
        let start = Instant::now();

        let outcome = tokio::select! {
            result = drive(allocator, &mut self.state, self.halting_threshold) => {
                result.map(|()| HaltReason::ThresholdReached)
            }
            () = shutdown => {
                warn!(run = self.run_number, "Simulation interrupted");
                Ok(HaltReason::Interrupted)
            }
        };

        allocator.teardown().await;
        self.phase = SimulationPhase::Halted;
        let halt_reason = outcome?;

        ProgressReporter::new(self.halting_threshold).report(&self.state);

        let summary = SimulationSummary {
            run_number: self.run_number,
            deployments_succeeded: self.state.deployments_succeeded,
            deployments_failed: self.state.deployments_failed,
            expected_deployments: self.state.expected_deployments,
            allocation_probability: self.state.allocation_probability,
            halting_threshold: self.halting_threshold,
            halt_reason,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };

        info!(
            run = summary.run_number,
            succeeded = summary.deployments_succeeded,
            failed = summary.deployments_failed,
            reason = ?summary.halt_reason,
            "Simulation halted"
        );
        Ok(summary)
    }

    pub fn phase(&self) -> SimulationPhase {
        self.phase
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Rows written to the deployment log of the current run
    pub fn records(&self) -> u64 {
        self.allocator.as_ref().map_or(0, Allocator::records)
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("phase", &self.phase)
            .field("state", &self.state)
            .field("allocator", &self.allocator)
            .finish()
    }
}

/// The main loop: one attempt per iteration, probability recomputed after each
async fn drive(allocator: &mut Allocator, state: &mut SimulationState, threshold: f64) -> Result<()> {
    state.expected_deployments = allocator.expected_deployments_estimate().await?;
    state.allocation_probability = allocator.allocation_probability().await?;

    let mut progress = ProgressReporter::new(threshold);
    progress.report(state);

    while state.allocation_probability > threshold {
        if allocator.request_allocation().await? {
            state.deployments_succeeded += 1;
        } else {
            state.deployments_failed += 1;
        }

        progress.tick(state);

        state.allocation_probability = allocator.allocation_probability().await?;
    }

    Ok(())
}
