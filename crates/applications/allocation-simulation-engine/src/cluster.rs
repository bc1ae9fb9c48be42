//! In-memory cluster used when no remote backend is attached
//!
//! Each node has a fixed capacity per resource. Deployments are placed on the
//! least-utilized node that fits them and pay a scarcity price: the reserve unit
//! price grows with the node's utilization at placement time.
//!
//! ```text
//! unit_price = reserve_unit_price * (1 + utilization_before)
//! price      = unit_price * requested_amount
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GatewayError;
use crate::gateway::{ClusterGateway, GatewayResult};
use crate::types::{DeploymentRequest, NodeSnapshot, Placement, ResourceRequest};

/// Simulated cluster record as it appears in an experiment file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of identical nodes
    pub nodes: usize,
    /// Capacity of each node, in raw units of the tracked resource
    pub capacity: f64,
    /// Price per raw unit on an empty node
    pub reserve_unit_price: f64,
    /// Artificial latency of each submission
    pub latency_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            nodes: 1,
            capacity: 10.0,
            reserve_unit_price: 0.0,
            latency_ms: 0,
        }
    }
}

/// A node of the simulated cluster
#[derive(Debug, Clone)]
pub struct SimulatedNode {
    pub name: String,
    capacity: BTreeMap<String, f64>,
    used: BTreeMap<String, f64>,
}

impl SimulatedNode {
    pub fn new(name: impl Into<String>) -> Self {
        SimulatedNode {
            name: name.into(),
            capacity: BTreeMap::new(),
            used: BTreeMap::new(),
        }
    }

    pub fn with_capacity(mut self, resource: impl Into<String>, amount: f64) -> Self {
        self.capacity.insert(resource.into(), amount);
        self
    }

    fn free(&self, resource: &str) -> f64 {
        let capacity = self.capacity.get(resource).copied().unwrap_or(0.0);
        capacity - self.used.get(resource).copied().unwrap_or(0.0)
    }

    fn utilization(&self, resource: &str) -> f64 {
        match self.capacity.get(resource) {
            Some(&capacity) if capacity > 0.0 => {
                (self.used.get(resource).copied().unwrap_or(0.0) / capacity).clamp(0.0, 1.0)
            }
            _ => 1.0,
        }
    }

    fn fits(&self, resources: &[ResourceRequest]) -> bool {
        resources
            .iter()
            .all(|r| self.capacity.contains_key(&r.resource) && r.amount <= self.free(&r.resource))
    }

    fn reserve(&mut self, resources: &[ResourceRequest]) {
        for r in resources {
            *self.used.entry(r.resource.clone()).or_insert(0.0) += r.amount;
        }
    }

    fn release(&mut self, resources: &[ResourceRequest]) {
        for r in resources {
            if let Some(used) = self.used.get_mut(&r.resource) {
                // Prevent negative values due to floating point errors
                *used = (*used - r.amount).max(0.0);
            }
        }
    }

    fn snapshot(&self) -> NodeSnapshot {
        self.capacity
            .iter()
            .fold(NodeSnapshot::new(self.name.clone()), |node, (resource, &capacity)| {
                node.with_resource(resource.clone(), capacity, self.free(resource))
            })
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: Vec<SimulatedNode>,
    deployments: HashMap<String, (usize, Vec<ResourceRequest>)>,
}

/// In-memory [`ClusterGateway`]
#[derive(Debug)]
pub struct SimulatedCluster {
    state: Mutex<ClusterState>,
    reserve_unit_price: f64,
    latency: Duration,
}

impl SimulatedCluster {
    /// Create a cluster from explicit nodes
    pub fn new(nodes: Vec<SimulatedNode>) -> Self {
        SimulatedCluster {
            state: Mutex::new(ClusterState {
                nodes,
                deployments: HashMap::new(),
            }),
            reserve_unit_price: 0.0,
            latency: Duration::ZERO,
        }
    }

    /// Create `config.nodes` identical nodes carrying `resource`
    pub fn from_config(config: &ClusterConfig, resource: &str) -> Self {
        let nodes = (0..config.nodes)
            .map(|i| SimulatedNode::new(format!("node-{}", i)).with_capacity(resource, config.capacity))
            .collect();

        Self::new(nodes)
            .with_reserve_unit_price(config.reserve_unit_price)
            .with_latency(Duration::from_millis(config.latency_ms))
    }

    pub fn with_reserve_unit_price(mut self, price: f64) -> Self {
        self.reserve_unit_price = price;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of deployments currently placed
    pub fn deployment_count(&self) -> usize {
        self.lock().map(|s| s.deployments.len()).unwrap_or(0)
    }

    fn lock(&self) -> GatewayResult<MutexGuard<'_, ClusterState>> {
        self.state
            .lock()
            .map_err(|_| GatewayError::unavailable("cluster state poisoned"))
    }
}

#[async_trait]
impl ClusterGateway for SimulatedCluster {
    async fn submit_deployment(&self, request: &DeploymentRequest) -> GatewayResult<Placement> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let primary = request
            .resources
            .first()
            .ok_or_else(|| GatewayError::unavailable("deployment requests no resources"))?;

        let mut state = self.lock()?;
        if state.deployments.contains_key(&request.name) {
            return Err(GatewayError::AlreadyExists(request.name.clone()));
        }

        // Least-utilized node that fits every requested resource
        let target = state
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.fits(&request.resources))
            .min_by(|(_, a), (_, b)| {
                a.utilization(&primary.resource)
                    .total_cmp(&b.utilization(&primary.resource))
            })
            .map(|(i, _)| i);

        let Some(index) = target else {
            let available = state
                .nodes
                .iter()
                .map(|n| n.free(&primary.resource))
                .fold(0.0, f64::max);
            return Err(GatewayError::InsufficientCapacity {
                need: primary.amount,
                available,
            });
        };

        let node = &mut state.nodes[index];
        let unit_price = self.reserve_unit_price * (1.0 + node.utilization(&primary.resource));
        let price = unit_price * primary.amount;
        if request.offer < price {
            return Err(GatewayError::OfferTooLow {
                offer: request.offer,
                price,
            });
        }

        node.reserve(&request.resources);
        let placement = Placement {
            node: node.name.clone(),
            resource_used: primary.amount,
            utilization: node.utilization(&primary.resource),
            price,
            unit_price,
        };

        debug!(
            deployment = %request.name,
            node = %placement.node,
            utilization = placement.utilization,
            "Placed deployment"
        );

        state
            .deployments
            .insert(request.name.clone(), (index, request.resources.clone()));
        Ok(placement)
    }

    async fn delete_deployment(&self, name: &str) -> GatewayResult<()> {
        let mut state = self.lock()?;
        let (index, resources) = state
            .deployments
            .remove(name)
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))?;
        if let Some(node) = state.nodes.get_mut(index) {
            node.release(&resources);
        }
        Ok(())
    }

    async fn list_nodes(&self) -> GatewayResult<Vec<NodeSnapshot>> {
        let state = self.lock()?;
        Ok(state.nodes.iter().map(SimulatedNode::snapshot).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn request(name: &str, amount: f64, offer: f64) -> DeploymentRequest {
        DeploymentRequest {
            name: name.to_string(),
            offer,
            resources: vec![ResourceRequest {
                resource: "cpu".to_string(),
                amount,
            }],
        }
    }

    #[tokio::test]
    async fn test_fills_until_capacity_exhausted() {
        let cluster = SimulatedCluster::from_config(&ClusterConfig::default(), "cpu");

        for i in 0..3 {
            assert_ok!(cluster.submit_deployment(&request(&format!("d{}", i), 3.0, 0.0)).await);
        }

        let err = cluster.submit_deployment(&request("d3", 3.0, 0.0)).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::InsufficientCapacity {
                need: 3.0,
                available: 1.0
            }
        );

        let nodes = cluster.list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].capacity("cpu").unwrap().free, 1.0);
        assert_eq!(nodes[0].capacity("cpu").unwrap().allocatable, 10.0);
    }

    #[tokio::test]
    async fn test_places_on_least_utilized_node() {
        let config = ClusterConfig {
            nodes: 2,
            ..Default::default()
        };
        let cluster = SimulatedCluster::from_config(&config, "cpu");

        let first = cluster.submit_deployment(&request("a", 4.0, 0.0)).await.unwrap();
        let second = cluster.submit_deployment(&request("b", 2.0, 0.0)).await.unwrap();

        assert_eq!(first.node, "node-0");
        assert_eq!(second.node, "node-1");
        assert_eq!(first.utilization, 0.4);
        assert_eq!(second.utilization, 0.2);
    }

    #[tokio::test]
    async fn test_scarcity_pricing() {
        let cluster = SimulatedCluster::from_config(&ClusterConfig::default(), "cpu").with_reserve_unit_price(1.0);

        let first = cluster.submit_deployment(&request("a", 5.0, 10.0)).await.unwrap();
        assert_eq!(first.unit_price, 1.0);
        assert_eq!(first.price, 5.0);

        // Node is half full: unit price rises by 50%
        let err = cluster.submit_deployment(&request("b", 2.0, 2.0)).await.unwrap_err();
        assert_eq!(err, GatewayError::OfferTooLow { offer: 2.0, price: 3.0 });

        let second = cluster.submit_deployment(&request("b", 2.0, 3.0)).await.unwrap();
        assert_eq!(second.unit_price, 1.5);
        assert_eq!(second.price, 3.0);
        assert_eq!(second.utilization, 0.7);
    }

    #[tokio::test]
    async fn test_delete_releases_capacity() {
        let cluster = SimulatedCluster::from_config(&ClusterConfig::default(), "cpu");

        assert_ok!(cluster.submit_deployment(&request("a", 6.0, 0.0)).await);
        assert_err!(cluster.submit_deployment(&request("a", 1.0, 0.0)).await);
        assert_eq!(cluster.deployment_count(), 1);

        assert_ok!(cluster.delete_deployment("a").await);
        assert_eq!(cluster.deployment_count(), 0);
        assert_eq!(
            cluster.delete_deployment("a").await,
            Err(GatewayError::NotFound("a".to_string()))
        );

        let nodes = cluster.list_nodes().await.unwrap();
        assert_eq!(nodes[0].capacity("cpu").unwrap().free, 10.0);
    }

    #[tokio::test]
    async fn test_unknown_resource_never_fits() {
        let cluster = SimulatedCluster::from_config(&ClusterConfig::default(), "cpu");
        let mut req = request("gpu-job", 1.0, 0.0);
        req.resources[0].resource = "gpu".to_string();

        assert!(matches!(
            cluster.submit_deployment(&req).await,
            Err(GatewayError::InsufficientCapacity { .. })
        ));
    }
}
