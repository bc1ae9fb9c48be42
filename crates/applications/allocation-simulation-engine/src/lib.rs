//! Allocation Simulation Engine
//!
//! Simulates repeated attempts to place stochastically sized deployments on a
//! capacity-constrained cluster that sells capacity market-style, and stops once
//! a fresh request is unlikely to fit anywhere.
//!
//! ```text
//! Simulator ──► Allocator ──► ClusterGateway (remote API or SimulatedCluster)
//!                  │
//!                  └──► DeploymentLog (one CSV row per attempt)
//! ```

#![warn(clippy::all)]

pub mod allocator;
pub mod cluster;
pub mod config;
pub mod distribution;
pub mod error;
pub mod gateway;
pub mod log;
pub mod simulator;
pub mod types;

pub use allocator::{Allocator, AllocatorConfig};
pub use cluster::{ClusterConfig, SimulatedCluster, SimulatedNode};
pub use config::{Experiment, SimulationSettings};
pub use distribution::{Distribution, DistributionConfig};
pub use error::{ConfigError, GatewayError, Result, SimulationError};
pub use gateway::ClusterGateway;
pub use log::DeploymentLog;
pub use simulator::{HaltReason, SimulationPhase, SimulationSummary, Simulator};
pub use types::{AllocationOutcome, AllocationRequest, NodeSnapshot, SimulationState};
