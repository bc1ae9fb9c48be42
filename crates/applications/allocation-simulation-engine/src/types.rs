//! Core types for the simulation engine

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One deployment attempt, derived from a size draw and a unit-offer draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationRequest {
    pub requested_size: f64, // Logical units
    pub offer: f64,          // size * unit offer
    pub raw_size: f64,       // size * resource scale
}

impl AllocationRequest {
    pub fn new(size: f64, unit_offer: f64, resource_scale: f64) -> Self {
        AllocationRequest {
            requested_size: size,
            offer: size * unit_offer,
            raw_size: size * resource_scale,
        }
    }
}

/// Outcome of a single allocation attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationOutcome {
    Success {
        resource_used: f64,
        node: String,
        utilization: f64,
        offer: f64,
        price: f64,
        unit_price: f64,
    },
    Failure {
        requested_raw_size: f64,
        offer: f64,
    },
}

impl AllocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AllocationOutcome::Success { .. })
    }
}

/// Run-level counters owned by the simulation driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub deployments_succeeded: u64,
    pub deployments_failed: u64,
    pub expected_deployments: u64,
    pub allocation_probability: f64,
}

impl SimulationState {
    pub fn attempts(&self) -> u64 {
        self.deployments_succeeded + self.deployments_failed
    }

    /// Percentage of expected deployments reached, capped at 100
    pub fn progress_percentage(&self) -> u64 {
        if self.expected_deployments == 0 {
            return 100;
        }
        (self.deployments_succeeded * 100 / self.expected_deployments).min(100)
    }
}

/// Amount of one resource requested by a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub resource: String,
    pub amount: f64, // Raw units
}

/// Deployment submitted to the cluster gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub name: String,
    pub offer: f64,
    pub resources: Vec<ResourceRequest>,
}

/// Where and at what price the gateway placed a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub node: String,
    pub resource_used: f64,
    pub utilization: f64, // Node utilization after placement, in [0, 1]
    pub price: f64,
    pub unit_price: f64,
}

/// Capacity of one resource on one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceCapacity {
    pub allocatable: f64,
    pub free: f64,
}

/// Per-node capacity snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub resources: BTreeMap<String, ResourceCapacity>,
}

impl NodeSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        NodeSnapshot {
            name: name.into(),
            resources: BTreeMap::new(),
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>, allocatable: f64, free: f64) -> Self {
        self.resources
            .insert(resource.into(), ResourceCapacity { allocatable, free });
        self
    }

    pub fn capacity(&self, resource: &str) -> Option<&ResourceCapacity> {
        self.resources.get(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_derivation() {
        let request = AllocationRequest::new(4.0, 0.5, 1000.0);

        assert_eq!(request.requested_size, 4.0);
        assert_eq!(request.offer, 2.0);
        assert_eq!(request.raw_size, 4000.0);
    }

    #[test]
    fn test_progress_percentage() {
        let mut state = SimulationState {
            expected_deployments: 8,
            ..Default::default()
        };
        assert_eq!(state.progress_percentage(), 0);

        state.deployments_succeeded = 4;
        assert_eq!(state.progress_percentage(), 50);

        // More successes than estimated still reports 100%
        state.deployments_succeeded = 12;
        assert_eq!(state.progress_percentage(), 100);
    }

    #[test]
    fn test_progress_without_estimate() {
        let state = SimulationState::default();
        assert_eq!(state.progress_percentage(), 100);
        assert_eq!(state.attempts(), 0);
    }

    #[test]
    fn test_node_snapshot_lookup() {
        let node = NodeSnapshot::new("node-0").with_resource("cpu", 8.0, 3.0);

        let cpu = node.capacity("cpu").unwrap();
        assert_eq!(cpu.allocatable, 8.0);
        assert_eq!(cpu.free, 3.0);
        assert!(node.capacity("memory").is_none());
    }
}
