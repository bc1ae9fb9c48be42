//! Cluster gateway abstraction
//!
//! The allocator talks to the cluster through this trait ONLY. The remote API's
//! wire format stays behind the implementation; the simulation sees three
//! capabilities: allocate, deallocate, query capacity.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{DeploymentRequest, NodeSnapshot, Placement};

/// Result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Capacity-constrained cluster that accepts or rejects deployments
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Try to place a deployment. Rejection is an `Err`, not a panic.
    async fn submit_deployment(&self, request: &DeploymentRequest) -> GatewayResult<Placement>;

    /// Remove a deployment. Repeated or failed deletions are safe to ignore.
    async fn delete_deployment(&self, name: &str) -> GatewayResult<()>;

    /// Per-node capacity snapshot
    async fn list_nodes(&self) -> GatewayResult<Vec<NodeSnapshot>>;
}
