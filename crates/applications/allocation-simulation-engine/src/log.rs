//! Per-attempt deployment log
//!
//! One CSV row per allocation attempt, in attempt order:
//!
//! ```text
//! accepted,size,node,utilization,offer,price,unit_price
//! 1,3000.0,node-0,0.3,4.2,0.0,0.0
//! 0,5000.0,,,1.7,,
//! ```
//!
//! Failed attempts leave node, utilization, price and unit_price empty.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::types::AllocationOutcome;

/// Column names, written once when the log is opened
pub const HEADER: [&str; 7] = [
    "accepted",
    "size",
    "node",
    "utilization",
    "offer",
    "price",
    "unit_price",
];

/// One row of the deployment log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentRecord {
    pub accepted: u8,
    pub size: f64,
    pub node: Option<String>,
    pub utilization: Option<f64>,
    pub offer: f64,
    pub price: Option<f64>,
    pub unit_price: Option<f64>,
}

impl From<&AllocationOutcome> for DeploymentRecord {
    fn from(outcome: &AllocationOutcome) -> Self {
        match outcome {
            AllocationOutcome::Success {
                resource_used,
                node,
                utilization,
                offer,
                price,
                unit_price,
            } => DeploymentRecord {
                accepted: 1,
                size: *resource_used,
                node: Some(node.clone()),
                utilization: Some(*utilization),
                offer: *offer,
                price: Some(*price),
                unit_price: Some(*unit_price),
            },
            AllocationOutcome::Failure {
                requested_raw_size,
                offer,
            } => DeploymentRecord {
                accepted: 0,
                size: *requested_raw_size,
                node: None,
                utilization: None,
                offer: *offer,
                price: None,
                unit_price: None,
            },
        }
    }
}

/// CSV sink for deployment records
pub struct DeploymentLog {
    writer: csv::Writer<Box<dyn Write + Send>>,
    records: u64,
}

impl DeploymentLog {
    /// Open a log over any writer and emit the header row
    pub fn new(sink: Box<dyn Write + Send>) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(sink);
        writer.write_record(HEADER)?;
        writer.flush()?;

        Ok(DeploymentLog { writer, records: 0 })
    }

    /// Create (or overwrite) a log file, creating parent directories as needed
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Self::new(Box::new(File::create(path)?))
    }

    /// Append the row for one attempt and flush it
    pub fn record(&mut self, outcome: &AllocationOutcome) -> Result<()> {
        self.writer.serialize(DeploymentRecord::from(outcome))?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Rows written so far, header excluded
    pub fn records(&self) -> u64 {
        self.records
    }
}

impl std::fmt::Debug for DeploymentLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentLog")
            .field("records", &self.records)
            .finish()
    }
}
