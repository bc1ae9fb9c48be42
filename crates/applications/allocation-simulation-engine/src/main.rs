//! Allocation Simulation Engine CLI
//!
//! Runs one run of an experiment section against the in-memory cluster.
//!
//! ```bash
//! # List the runs of a section
//! alloc-sim --config experiments.json --section scarcity --list
//!
//! # Run number 3, writing the summary as JSON
//! alloc-sim --config experiments.json --section scarcity --run 3 --summary out/summary_3.json
//! ```
//!
//! Ctrl+C stops the loop; every deployment requested so far is deleted
//! before exiting.

use std::fs;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use allocation_simulation_engine::{DeploymentLog, Experiment, SimulatedCluster, Simulator};

#[derive(Parser, Debug)]
#[command(name = "alloc-sim")]
#[command(about = "Simulate market-style allocation against a capacity-constrained cluster", long_about = None)]
struct Args {
    /// Experiment file (JSON)
    #[arg(short, long)]
    config: String,

    /// Section of the experiment file
    #[arg(short, long)]
    section: String,

    /// Run number within the section
    #[arg(short, long, default_value_t = 0)]
    run: usize,

    /// List the runs of the section and exit
    #[arg(long)]
    list: bool,

    /// Write the run summary to this JSON file
    #[arg(long)]
    summary: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "allocation_simulation_engine=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let experiment = Experiment::from_path(&args.config)
        .with_context(|| format!("Failed to load experiment file {}", args.config))?;
    let runs = experiment.runs_count(&args.section)?;

    if args.list {
        println!("Section {} has {} runs:", args.section, runs);
        for run in 0..runs {
            println!("  {:>4}: {}", run, experiment.describe(&args.section, run)?);
        }
        return Ok(());
    }

    let settings = experiment.settings(&args.section, args.run)?;

    println!("Configuration:");
    println!("  Section: {} (run {}/{})", args.section, args.run, runs);
    println!("  Seed: {}", settings.seed);
    println!("  Halting threshold: {:.2}", settings.halting_threshold);
    println!("  Resource: {} (scale {})", settings.resource, settings.resource_scale);
    println!(
        "  Cluster: {} nodes x {} {}",
        settings.cluster.nodes, settings.cluster.capacity, settings.resource
    );
    println!("  Output: {}\n", settings.output);

    let log = DeploymentLog::create(&settings.output)
        .with_context(|| format!("Failed to open deployment log {}", settings.output))?;
    let cluster = Arc::new(SimulatedCluster::from_config(&settings.cluster, &settings.resource));

    let mut simulator = Simulator::new(cluster);
    simulator.initialize(&settings, log)?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl+C received, stopping"),
            Err(e) => {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let summary = simulator.run(shutdown).await?;
    let (hours, minutes, seconds) = summary.elapsed_hms();

    println!(
        "\nReached allocation probability of {:.2}. Terminating.",
        summary.allocation_probability
    );
    println!("Failed deployments: {}", summary.deployments_failed);
    println!("Successful deployments: {}", summary.deployments_succeeded);
    println!(
        "Total simulation time: {} hours, {} minutes, {} seconds",
        hours, minutes, seconds
    );

    if let Some(path) = args.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(&path, json).with_context(|| format!("Failed to write summary {}", path))?;
        println!("Summary saved to {}", path);
    }

    Ok(())
}
