//! Random variables used to draw deployment sizes and unit offers
//!
//! Each family answers three questions in closed form:
//! - `sample`: draw one value from a caller-supplied RNG
//! - `probability_in_range`: `CDF(b) - CDF(a)`
//! - `mean`: the expectation
//!
//! A [`Distribution`] is built once per run from a [`DistributionConfig`]
//! record and never mutates afterwards.

use rand::Rng;
use rand_distr::Distribution as _;
use rand_distr::{Exp, Pareto, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Distribution record as it appears in an experiment file
///
/// ```json
/// {"distribution": "unif", "min": 1, "max": 4, "int": 1}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionConfig {
    pub distribution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lambda: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int: Option<IntegerFlag>,
}

/// `int` accepts either `1`/`0` or `true`/`false`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntegerFlag {
    Bool(bool),
    Number(i64),
}

impl IntegerFlag {
    fn enabled(self) -> bool {
        match self {
            IntegerFlag::Bool(flag) => flag,
            IntegerFlag::Number(n) => n == 1,
        }
    }
}

impl DistributionConfig {
    pub const CONSTANT: &'static str = "const";
    pub const UNIFORM: &'static str = "unif";
    pub const EXPONENTIAL: &'static str = "exp";
    pub const PARETO: &'static str = "pareto";

    pub fn constant(value: f64) -> Self {
        DistributionConfig {
            distribution: Self::CONSTANT.to_string(),
            mean: Some(value),
            ..Default::default()
        }
    }

    pub fn uniform(min: f64, max: f64, integer: bool) -> Self {
        DistributionConfig {
            distribution: Self::UNIFORM.to_string(),
            min: Some(min),
            max: Some(max),
            int: integer.then_some(IntegerFlag::Number(1)),
            ..Default::default()
        }
    }

    pub fn exponential(mean: f64) -> Self {
        DistributionConfig {
            distribution: Self::EXPONENTIAL.to_string(),
            mean: Some(mean),
            ..Default::default()
        }
    }

    pub fn pareto(shape: f64, mode: f64, integer: bool) -> Self {
        DistributionConfig {
            distribution: Self::PARETO.to_string(),
            shape: Some(shape),
            mode: Some(mode),
            int: integer.then_some(IntegerFlag::Number(1)),
            ..Default::default()
        }
    }

    fn integer(&self) -> bool {
        self.int.is_some_and(IntegerFlag::enabled)
    }

    fn require(&self, value: Option<f64>, parameter: &'static str) -> Result<f64, ConfigError> {
        let value = value.ok_or_else(|| ConfigError::missing(&self.distribution, parameter))?;
        if !value.is_finite() {
            return Err(ConfigError::out_of_range(parameter, value, "must be finite"));
        }
        Ok(value)
    }
}

/// A scalar random variable of one of the supported families
#[derive(Debug, Clone)]
pub enum Distribution {
    Constant {
        value: f64,
    },
    Uniform {
        min: f64,
        max: f64,
        integer: bool,
        sampler: Uniform<f64>,
    },
    Exponential {
        mean: f64,
        sampler: Exp<f64>,
    },
    Pareto {
        shape: f64,
        mode: f64,
        integer: bool,
        sampler: Pareto<f64>,
    },
}

impl Distribution {
    /// Build a distribution from its configuration record
    pub fn from_config(config: &DistributionConfig) -> Result<Self, ConfigError> {
        match config.distribution.as_str() {
            DistributionConfig::CONSTANT => {
                let value = config.require(config.mean, "mean")?;
                Ok(Self::constant(value))
            }
            DistributionConfig::UNIFORM => {
                let min = config.require(config.min, "min")?;
                let max = config.require(config.max, "max")?;
                Self::uniform(min, max, config.integer())
            }
            DistributionConfig::EXPONENTIAL => {
                // `mean` wins over `lambda` when both are given
                let mean = match (config.mean, config.lambda) {
                    (Some(_), _) => config.require(config.mean, "mean")?,
                    (None, Some(_)) => {
                        let lambda = config.require(config.lambda, "lambda")?;
                        if lambda <= 0.0 {
                            return Err(ConfigError::out_of_range("lambda", lambda, "must be positive"));
                        }
                        1.0 / lambda
                    }
                    (None, None) => return Err(ConfigError::missing(&config.distribution, "mean")),
                };
                Self::exponential(mean)
            }
            DistributionConfig::PARETO => {
                let shape = config.require(config.shape, "shape")?;
                let mode = config.require(config.mode, "mode")?;
                Self::pareto(shape, mode, config.integer())
            }
            other => Err(ConfigError::UnknownDistribution(other.to_string())),
        }
    }

    pub fn constant(value: f64) -> Self {
        Distribution::Constant { value }
    }

    pub fn uniform(min: f64, max: f64, integer: bool) -> Result<Self, ConfigError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(ConfigError::out_of_range("min/max", min, "bounds must be finite"));
        }
        if min > max {
            return Err(ConfigError::out_of_range("min", min, "must not exceed max"));
        }
        // rand scales the span by 1 / (1 - EPSILON) and panics if that overflows
        if !((max - min) / (1.0 - f64::EPSILON)).is_finite() {
            return Err(ConfigError::out_of_range("max", max, "range must be finite"));
        }
        Ok(Distribution::Uniform {
            min,
            max,
            integer,
            sampler: Uniform::new_inclusive(min, max),
        })
    }

    pub fn exponential(mean: f64) -> Result<Self, ConfigError> {
        if mean <= 0.0 {
            return Err(ConfigError::out_of_range("mean", mean, "must be positive"));
        }
        let sampler = Exp::new(1.0 / mean)
            .map_err(|_| ConfigError::out_of_range("mean", mean, "must be positive"))?;
        Ok(Distribution::Exponential { mean, sampler })
    }

    pub fn pareto(shape: f64, mode: f64, integer: bool) -> Result<Self, ConfigError> {
        if shape <= 0.0 {
            return Err(ConfigError::out_of_range("shape", shape, "must be positive"));
        }
        if mode <= 0.0 {
            return Err(ConfigError::out_of_range("mode", mode, "must be positive"));
        }
        let sampler = Pareto::new(mode, shape)
            .map_err(|_| ConfigError::out_of_range("shape", shape, "must be positive"))?;
        Ok(Distribution::Pareto {
            shape,
            mode,
            integer,
            sampler,
        })
    }

    /// Family name as used in experiment files
    pub fn name(&self) -> &'static str {
        match self {
            Distribution::Constant { .. } => DistributionConfig::CONSTANT,
            Distribution::Uniform { .. } => DistributionConfig::UNIFORM,
            Distribution::Exponential { .. } => DistributionConfig::EXPONENTIAL,
            Distribution::Pareto { .. } => DistributionConfig::PARETO,
        }
    }

    /// Draw one value
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Distribution::Constant { value } => *value,
            Distribution::Uniform { integer, sampler, .. } => round_if(*integer, sampler.sample(rng)),
            Distribution::Exponential { sampler, .. } => sampler.sample(rng),
            Distribution::Pareto { integer, sampler, .. } => round_if(*integer, sampler.sample(rng)),
        }
    }

    /// Probability that a draw falls in `[a, b]`
    pub fn probability_in_range(&self, a: f64, b: f64) -> f64 {
        let point = match self {
            Distribution::Constant { value } => Some(*value),
            Distribution::Uniform { min, max, .. } if min == max => Some(*min),
            _ => None,
        };
        if let Some(value) = point {
            return if a <= value && value <= b { 1.0 } else { 0.0 };
        }
        (self.cdf(b) - self.cdf(a)).clamp(0.0, 1.0)
    }

    /// Expected value
    ///
    /// Infinite for Pareto with `shape <= 1`.
    pub fn mean(&self) -> f64 {
        match self {
            Distribution::Constant { value } => *value,
            Distribution::Uniform { min, max, .. } => (min + max) / 2.0,
            Distribution::Exponential { mean, .. } => *mean,
            Distribution::Pareto { shape, mode, .. } => {
                if *shape <= 1.0 {
                    f64::INFINITY
                } else {
                    shape * mode / (shape - 1.0)
                }
            }
        }
    }

    fn cdf(&self, x: f64) -> f64 {
        match self {
            Distribution::Constant { value } => {
                if x >= *value {
                    1.0
                } else {
                    0.0
                }
            }
            Distribution::Uniform { min, max, .. } => {
                if x < *min {
                    0.0
                } else if x >= *max {
                    1.0
                } else {
                    (x - min) / (max - min)
                }
            }
            Distribution::Exponential { mean, .. } => {
                if x <= 0.0 {
                    0.0
                } else {
                    1.0 - (-x / mean).exp()
                }
            }
            Distribution::Pareto { shape, mode, .. } => {
                if x < *mode {
                    0.0
                } else {
                    1.0 - (mode / x).powf(*shape)
                }
            }
        }
    }
}

fn round_if(integer: bool, value: f64) -> f64 {
    if integer { value.round() } else { value }
}
