//! Error types for the simulation engine

use std::time::Duration;
use thiserror::Error;

/// Simulation result type
pub type Result<T> = std::result::Result<T, SimulationError>;

/// Fatal configuration problems, raised before any gateway call is made
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Distribution name is not one of const/unif/exp/pareto
    #[error("Unknown distribution: {0}")]
    UnknownDistribution(String),

    /// A parameter required by the chosen distribution is absent
    #[error("Distribution {distribution} requires parameter '{parameter}'")]
    MissingParameter {
        distribution: String,
        parameter: &'static str,
    },

    /// A parameter is present but violates its invariant
    #[error("Invalid value {value} for parameter '{parameter}': {reason}")]
    InvalidParameter {
        parameter: String,
        value: f64,
        reason: &'static str,
    },

    /// Halting threshold outside (0, 1)
    #[error("Halting threshold must lie in (0, 1), got {0}")]
    InvalidThreshold(f64),

    /// Requested run does not exist in the section
    #[error("Run {run} does not exist (section has {count} runs)")]
    UnknownRun { run: usize, count: usize },

    /// Requested section does not exist in the experiment file
    #[error("Section '{0}' not found in experiment file")]
    UnknownSection(String),

    /// Any other malformed configuration
    #[error("Configuration error: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create a generic configuration error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub(crate) fn missing(distribution: &str, parameter: &'static str) -> Self {
        Self::MissingParameter {
            distribution: distribution.to_string(),
            parameter,
        }
    }

    pub(crate) fn out_of_range(parameter: impl Into<String>, value: f64, reason: &'static str) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value,
            reason,
        }
    }
}

/// Errors reported by a cluster gateway
///
/// A failed submission is an expected outcome (recorded as a failed attempt);
/// a failed deletion during teardown is swallowed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// No node has enough free capacity for the request
    #[error("Insufficient capacity: need {need}, largest free {available}")]
    InsufficientCapacity { need: f64, available: f64 },

    /// The offer does not cover the asking price
    #[error("Offer {offer:.4} below asking price {price:.4}")]
    OfferTooLow { offer: f64, price: f64 },

    /// A deployment with this name already exists
    #[error("Deployment {0} already exists")]
    AlreadyExists(String),

    /// Deployment not known to the cluster
    #[error("Deployment {0} not found")]
    NotFound(String),

    /// The call did not complete in time
    #[error("Gateway call timed out after {0:?}")]
    Timeout(Duration),

    /// Backend unreachable or returned an unexpected response
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Create an unavailable-backend error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Errors that abort a simulation run
#[derive(Error, Debug)]
pub enum SimulationError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Capacity query against the gateway failed
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Deployment log could not be written
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
