//! Deployment sizing, submission and capacity-probability queries
//!
//! The allocator owns everything one run needs to issue requests: the two
//! distributions, the seeded RNG, the gateway handle and the deployment log.
//! All of them are injected at construction.
//!
//! Two capacity measures are derived from node snapshots:
//! - **expected deployments**: sum over nodes of how many mean-sized
//!   deployments fit in the node's allocatable capacity (progress only)
//! - **allocation probability**: probability that the next size draw fits in
//!   the free capacity of the most constrained node (drives halting)

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::distribution::Distribution;
use crate::error::{GatewayError, Result};
use crate::gateway::{ClusterGateway, GatewayResult};
use crate::log::DeploymentLog;
use crate::types::{AllocationOutcome, AllocationRequest, DeploymentRequest, NodeSnapshot, ResourceRequest};

/// Default time allowed for one gateway call
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed parameters of an allocator
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub size: Distribution,
    pub offer: Distribution,
    pub resource: String,
    pub resource_scale: f64,
    pub run_number: usize,
    pub gateway_timeout: Duration,
}

/// Issues deployment requests against a cluster gateway
pub struct Allocator {
    config: AllocatorConfig,
    gateway: Arc<dyn ClusterGateway>,
    log: DeploymentLog,
    rng: StdRng,
    next_index: u64,
    outstanding: Vec<String>,
}

impl Allocator {
    pub fn new(config: AllocatorConfig, gateway: Arc<dyn ClusterGateway>, log: DeploymentLog, rng: StdRng) -> Self {
        Allocator {
            config,
            gateway,
            log,
            rng,
            next_index: 0,
            outstanding: Vec::new(),
        }
    }

    /// Draw, submit and log one deployment
    ///
    /// Returns whether the gateway accepted it. A rejection or timeout is a
    /// normal outcome; only a log write failure is an error.
    pub async fn request_allocation(&mut self) -> Result<bool> {
        let size = self.config.size.sample(&mut self.rng);
        let unit_offer = self.config.offer.sample(&mut self.rng);
        let request = AllocationRequest::new(size, unit_offer, self.config.resource_scale);

        let name = format!("sim-{}-{}", self.config.run_number, self.next_index);
        self.next_index += 1;

        // Tracked before submitting so teardown also covers partial creations
        self.outstanding.push(name.clone());

        let deployment = DeploymentRequest {
            name,
            offer: request.offer,
            resources: vec![ResourceRequest {
                resource: self.config.resource.clone(),
                amount: request.raw_size,
            }],
        };

        let gateway = Arc::clone(&self.gateway);
        let result = self.call(gateway.submit_deployment(&deployment)).await;

        let outcome = match result {
            Ok(placement) => AllocationOutcome::Success {
                resource_used: placement.resource_used,
                node: placement.node,
                utilization: placement.utilization,
                offer: request.offer,
                price: placement.price,
                unit_price: placement.unit_price,
            },
            Err(e) => {
                debug!(deployment = %deployment.name, error = %e, "Deployment rejected");
                AllocationOutcome::Failure {
                    requested_raw_size: request.raw_size,
                    offer: request.offer,
                }
            }
        };

        self.log.record(&outcome)?;
        Ok(outcome.is_success())
    }

    /// Number of mean-sized deployments the cluster could hold when empty
    pub async fn expected_deployments_estimate(&self) -> Result<u64> {
        let nodes = self.nodes().await?;
        Ok(expected_deployments(
            &nodes,
            &self.config.resource,
            self.config.resource_scale,
            self.config.size.mean(),
        ))
    }

    /// Probability that the next size draw fits in the most constrained node
    pub async fn allocation_probability(&self) -> Result<f64> {
        let nodes = self.nodes().await?;
        Ok(allocation_probability(
            &nodes,
            &self.config.resource,
            self.config.resource_scale,
            &self.config.size,
        ))
    }

    /// Delete every deployment this allocator has requested
    ///
    /// Best effort: failures are logged and otherwise ignored.
    pub async fn teardown(&mut self) {
        let names = std::mem::take(&mut self.outstanding);
        if names.is_empty() {
            return;
        }

        info!(deployments = names.len(), "Tearing down deployments");

        let gateway = Arc::clone(&self.gateway);
        let mut failed = 0usize;
        for name in &names {
            if let Err(e) = self.call(gateway.delete_deployment(name)).await {
                failed += 1;
                match e {
                    // Rejected requests were never created
                    GatewayError::NotFound(_) => debug!(deployment = %name, "Nothing to delete"),
                    _ => warn!(deployment = %name, error = %e, "Failed to delete deployment"),
                }
            }
        }

        debug!(deleted = names.len() - failed, failed, "Teardown finished");
    }

    /// Deployment names awaiting teardown
    pub fn outstanding(&self) -> &[String] {
        &self.outstanding
    }

    /// Rows written to the deployment log
    pub fn records(&self) -> u64 {
        self.log.records()
    }

    async fn nodes(&self) -> Result<Vec<NodeSnapshot>> {
        let gateway = Arc::clone(&self.gateway);
        Ok(self.call(gateway.list_nodes()).await?)
    }

    /// Run a gateway call under the configured timeout
    async fn call<T>(&self, fut: impl Future<Output = GatewayResult<T>>) -> GatewayResult<T> {
        let timeout = self.config.gateway_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .unwrap_or(Err(GatewayError::Timeout(timeout)))
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("config", &self.config)
            .field("next_index", &self.next_index)
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}

/// Sum over nodes of `floor((allocatable / scale) / mean_size)`
pub fn expected_deployments(nodes: &[NodeSnapshot], resource: &str, scale: f64, mean_size: f64) -> u64 {
    if !(mean_size > 0.0) {
        return 0;
    }
    nodes
        .iter()
        .filter_map(|node| node.capacity(resource))
        .map(|capacity| {
            let fits = (capacity.allocatable / scale / mean_size).floor();
            if fits.is_finite() && fits > 0.0 { fits as u64 } else { 0 }
        })
        .sum()
}

/// `size.probability_in_range(0, min_free / scale)` over nodes carrying `resource`
pub fn allocation_probability(nodes: &[NodeSnapshot], resource: &str, scale: f64, size: &Distribution) -> f64 {
    let min_free = nodes
        .iter()
        .filter_map(|node| node.capacity(resource))
        .map(|capacity| capacity.free)
        .reduce(f64::min)
        .unwrap_or(0.0)
        .max(0.0);

    size.probability_in_range(0.0, min_free / scale).clamp(0.0, 1.0)
}
