//! Experiment files and per-run settings
//!
//! An experiment file is a JSON object of named sections. Inside a section,
//! every parameter whose value is an array is a sweep axis; the runs of the
//! section are the cartesian product of its axes. Axes are ordered by parameter
//! name and the last one varies fastest.
//!
//! ```json
//! {
//!   "scarcity": {
//!     "seed": [1, 2, 3],
//!     "halting_threshold": 0.05,
//!     "resource_scale": 1000,
//!     "size": [
//!       {"distribution": "unif", "min": 1, "max": 4, "int": 1},
//!       {"distribution": "unif", "min": 1, "max": 8, "int": 1}
//!     ],
//!     "offer": {"distribution": "exp", "mean": 1.0},
//!     "cluster": {"nodes": 4, "capacity": 16000, "reserve_unit_price": 0.0002},
//!     "output": "results/scarcity_{size.max}_{seed}.csv"
//!   }
//! }
//! ```
//!
//! The section above has 6 runs.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cluster::ClusterConfig;
use crate::distribution::{Distribution, DistributionConfig};
use crate::error::{ConfigError, Result};

fn default_resource_scale() -> f64 {
    1.0
}

fn default_resource() -> String {
    "cpu".to_string()
}

fn default_gateway_timeout_secs() -> f64 {
    30.0
}

fn default_output() -> String {
    "{section}_{run}.csv".to_string()
}

/// Fully resolved parameters of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Seed of the run's single random stream
    pub seed: u64,

    /// Stop once the allocation probability drops to this value or below
    pub halting_threshold: f64,

    /// Raw units per logical size unit
    #[serde(default = "default_resource_scale")]
    pub resource_scale: f64,

    /// Resource requested from the cluster
    #[serde(default = "default_resource")]
    pub resource: String,

    /// Deployment size distribution (logical units)
    pub size: DistributionConfig,

    /// Offer per logical unit
    pub offer: DistributionConfig,

    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: f64,

    /// Deployment log path (already expanded when produced by [`Experiment`])
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(skip)]
    pub run_number: usize,
}

impl SimulationSettings {
    /// Check every invariant, distribution records included
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        Distribution::from_config(&self.size)?;
        Distribution::from_config(&self.offer)?;

        let threshold = self.halting_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        if !(self.resource_scale.is_finite() && self.resource_scale > 0.0) {
            return Err(ConfigError::out_of_range(
                "resource_scale",
                self.resource_scale,
                "must be positive and finite",
            ));
        }
        if !(self.gateway_timeout_secs.is_finite() && self.gateway_timeout_secs > 0.0) {
            return Err(ConfigError::out_of_range(
                "gateway_timeout_secs",
                self.gateway_timeout_secs,
                "must be positive and finite",
            ));
        }
        if self.resource.is_empty() {
            return Err(ConfigError::invalid("resource name must not be empty"));
        }
        Ok(())
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.gateway_timeout_secs)
    }
}

/// Parsed experiment file
#[derive(Debug, Clone, Default)]
pub struct Experiment {
    sections: BTreeMap<String, Map<String, Value>>,
}

impl Experiment {
    /// Load an experiment file from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }

    /// Parse an experiment from JSON text
    pub fn from_json(text: &str) -> std::result::Result<Self, ConfigError> {
        let sections: BTreeMap<String, Map<String, Value>> = serde_json::from_str(text)
            .map_err(|e| ConfigError::invalid(format!("malformed experiment file: {}", e)))?;
        Ok(Experiment { sections })
    }

    /// Section names, sorted
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Number of runs in a section
    pub fn runs_count(&self, section: &str) -> std::result::Result<usize, ConfigError> {
        let params = self.section(section)?;
        Ok(axes(params).iter().map(|(_, values)| values.len()).product())
    }

    /// Raw parameters of one run, with every sweep axis collapsed to its value
    pub fn parameters(&self, section: &str, run: usize) -> std::result::Result<Map<String, Value>, ConfigError> {
        let params = self.section(section)?;
        let count = self.runs_count(section)?;
        if run >= count {
            return Err(ConfigError::UnknownRun { run, count });
        }

        // Mixed-radix decomposition of the run number, last axis fastest
        let mut selected = params.clone();
        let mut remainder = run;
        for (key, values) in axes(params).into_iter().rev() {
            let index = remainder % values.len();
            remainder /= values.len();
            selected.insert(key.clone(), values[index].clone());
        }
        Ok(selected)
    }

    /// Typed, validated settings of one run, with the output path expanded
    pub fn settings(&self, section: &str, run: usize) -> std::result::Result<SimulationSettings, ConfigError> {
        let params = self.parameters(section, run)?;
        let mut settings: SimulationSettings = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| ConfigError::invalid(format!("section '{}' run {}: {}", section, run, e)))?;

        settings.run_number = run;
        settings.output = expand_template(&settings.output, section, run, &params);
        settings.validate()?;
        Ok(settings)
    }

    /// Human readable listing of the swept parameters of one run
    pub fn describe(&self, section: &str, run: usize) -> std::result::Result<String, ConfigError> {
        let params = self.parameters(section, run)?;
        let swept: Vec<String> = axes(self.section(section)?)
            .iter()
            .filter_map(|(key, _)| params.get(key.as_str()).map(|v| format!("{}={}", key, v)))
            .collect();
        Ok(swept.join(", "))
    }

    fn section(&self, section: &str) -> std::result::Result<&Map<String, Value>, ConfigError> {
        self.sections
            .get(section)
            .ok_or_else(|| ConfigError::UnknownSection(section.to_string()))
    }
}

fn axes(params: &Map<String, Value>) -> Vec<(&String, &Vec<Value>)> {
    params
        .iter()
        .filter_map(|(key, value)| value.as_array().map(|values| (key, values)))
        .collect()
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Substitute `{section}`, `{run}`, `{param}` and `{param.field}`
fn expand_template(template: &str, section: &str, run: usize, params: &Map<String, Value>) -> String {
    let mut out = template
        .replace("{section}", section)
        .replace("{run}", &run.to_string());

    for (key, value) in params {
        if let Some(text) = scalar(value) {
            out = out.replace(&format!("{{{}}}", key), &text);
        } else if let Value::Object(fields) = value {
            for (field, inner) in fields {
                if let Some(text) = scalar(inner) {
                    out = out.replace(&format!("{{{}.{}}}", key, field), &text);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPERIMENT: &str = r#"{
        "scarcity": {
            "seed": [1, 2, 3],
            "halting_threshold": 0.05,
            "resource_scale": 1000,
            "size": [
                {"distribution": "unif", "min": 1, "max": 4, "int": 1},
                {"distribution": "unif", "min": 1, "max": 8, "int": 1}
            ],
            "offer": {"distribution": "exp", "mean": 1.0},
            "cluster": {"nodes": 4, "capacity": 16000},
            "output": "results/scarcity_{size.max}_{seed}.csv"
        },
        "single": {
            "seed": 7,
            "halting_threshold": 0.1,
            "size": {"distribution": "const", "mean": 2},
            "offer": {"distribution": "const", "mean": 1}
        },
        "broken": {
            "seed": 1,
            "halting_threshold": 1.5,
            "size": {"distribution": "const", "mean": 2},
            "offer": {"distribution": "const", "mean": 1}
        }
    }"#;

    #[test]
    fn test_runs_count_is_product_of_axes() {
        let experiment = Experiment::from_json(EXPERIMENT).unwrap();

        assert_eq!(experiment.runs_count("scarcity").unwrap(), 6);
        assert_eq!(experiment.runs_count("single").unwrap(), 1);
        assert_eq!(
            experiment.sections().collect::<Vec<_>>(),
            vec!["broken", "scarcity", "single"]
        );
    }

    #[test]
    fn test_runs_enumerate_distinct_combinations() {
        let experiment = Experiment::from_json(EXPERIMENT).unwrap();

        let combos: Vec<(u64, f64)> = (0..6)
            .map(|run| {
                let s = experiment.settings("scarcity", run).unwrap();
                (s.seed, s.size.max.unwrap())
            })
            .collect();

        // Axes sorted by name: seed (slow), size (fast)
        assert_eq!(
            combos,
            vec![(1, 4.0), (1, 8.0), (2, 4.0), (2, 8.0), (3, 4.0), (3, 8.0)]
        );
    }

    #[test]
    fn test_settings_defaults_and_template() {
        let experiment = Experiment::from_json(EXPERIMENT).unwrap();

        let settings = experiment.settings("scarcity", 3).unwrap();
        assert_eq!(settings.run_number, 3);
        assert_eq!(settings.output, "results/scarcity_8_2.csv");
        assert_eq!(settings.resource, "cpu");
        assert_eq!(settings.resource_scale, 1000.0);
        assert_eq!(settings.cluster.nodes, 4);
        assert_eq!(settings.cluster.reserve_unit_price, 0.0);
        assert_eq!(settings.gateway_timeout(), Duration::from_secs(30));

        let single = experiment.settings("single", 0).unwrap();
        assert_eq!(single.output, "single_0.csv");
        assert_eq!(single.resource_scale, 1.0);
        assert_eq!(single.cluster, ClusterConfig::default());
    }

    #[test]
    fn test_describe_lists_swept_parameters() {
        let experiment = Experiment::from_json(EXPERIMENT).unwrap();
        let text = experiment.describe("scarcity", 0).unwrap();

        assert!(text.starts_with("seed=1, size="));
        assert!(text.contains("\"max\":4"));
        assert_eq!(experiment.describe("single", 0).unwrap(), "");
    }

    #[test]
    fn test_invalid_requests() {
        let experiment = Experiment::from_json(EXPERIMENT).unwrap();

        assert_eq!(
            experiment.settings("scarcity", 6).unwrap_err(),
            ConfigError::UnknownRun { run: 6, count: 6 }
        );
        assert_eq!(
            experiment.runs_count("missing").unwrap_err(),
            ConfigError::UnknownSection("missing".to_string())
        );
        assert_eq!(
            experiment.settings("broken", 0).unwrap_err(),
            ConfigError::InvalidThreshold(1.5)
        );
        assert!(Experiment::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_bundled_experiment_file_is_valid() {
        let experiment = Experiment::from_json(include_str!("../experiments/scarcity.json")).unwrap();

        for section in ["scarcity", "heavy_tail", "constant"] {
            let runs = experiment.runs_count(section).unwrap();
            for run in 0..runs {
                assert!(experiment.settings(section, run).is_ok(), "{} run {}", section, run);
            }
        }
        assert_eq!(
            experiment.settings("scarcity", 5).unwrap().output,
            "results/scarcity_1_8_3.csv"
        );
    }

    #[test]
    fn test_validate_rejects_bad_scalars() {
        let experiment = Experiment::from_json(EXPERIMENT).unwrap();
        let mut settings = experiment.settings("single", 0).unwrap();

        settings.resource_scale = 0.0;
        assert!(settings.validate().is_err());

        settings.resource_scale = 1.0;
        settings.halting_threshold = 0.0;
        assert_eq!(settings.validate(), Err(ConfigError::InvalidThreshold(0.0)));

        settings.halting_threshold = 0.5;
        settings.gateway_timeout_secs = -1.0;
        assert!(settings.validate().is_err());

        settings.gateway_timeout_secs = 1.0;
        settings.size = DistributionConfig::uniform(4.0, 1.0, false);
        assert!(settings.validate().is_err());

        settings.size = DistributionConfig::constant(1.0);
        assert_eq!(settings.validate(), Ok(()));
    }
}
