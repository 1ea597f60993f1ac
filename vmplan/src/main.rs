use clap::Parser;
use std::path::PathBuf;

use vmplan_core::config::PartitionMode;
use vmplan_core::{PlanError, PlanOutcome, PlanResult, Planner, PlannerConfig};

mod demo;

use demo::ClusterShape;

#[derive(Parser)]
#[command(name = "vmplan")]
#[command(about = "Reconfiguration planner for virtualized clusters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Print the effective planner configuration as TOML
    Config {
        /// Planner configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Plan the reconfiguration of a seeded synthetic cluster
    Demo {
        /// Number of nodes
        #[arg(long, default_value = "8")]
        nodes: usize,

        /// Number of VMs
        #[arg(long, default_value = "24")]
        vms: usize,

        /// Number of nodes to switch off
        #[arg(long, default_value = "1")]
        shutdown: usize,

        /// Number of racks; VMs are fenced in the rack they start in
        #[arg(long, default_value = "1")]
        racks: usize,

        /// Size of the spread groups, 0 for none
        #[arg(long, default_value = "0")]
        spread: usize,

        /// Random seed of the cluster
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Override the partitioning mode ("disabled", "sequential", "parallel")
        #[arg(long)]
        partitioning: Option<PartitionMode>,

        /// Print the solving statistics as JSON
        #[arg(long)]
        json: bool,

        /// Planner configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> PlanResult<PlannerConfig> {
    match path {
        Some(path) => PlannerConfig::from_file(path),
        None => {
            let mut config = PlannerConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> PlanResult<()> {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "vmplan=info"
            .parse()
            .map_err(|e| PlanError::configuration("log", format!("Invalid log directive: {}", e)))?,
    );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { config } => {
            let config = load_config(config)?;
            print!("{}", config.to_toml_string()?);
        }
        Commands::Demo {
            nodes,
            vms,
            shutdown,
            racks,
            spread,
            seed,
            partitioning,
            json,
            config,
        } => {
            let mut config = load_config(config)?;
            if let Some(mode) = partitioning {
                config.solver.partitioning = mode;
            }
            let demo = ClusterShape {
                nodes,
                vms,
                shutdown,
                racks,
                spread,
                seed,
            }
            .generate();
            if demo.unplaced > 0 {
                tracing::warn!("{} VMs did not fit and are left waiting", demo.unplaced);
            }
            for constraint in &demo.constraints {
                tracing::debug!("Constraint {}", constraint);
            }

            let mode = config.solver.partitioning;
            let mut planner = Planner::new(config);
            let outcome = if mode == PartitionMode::Parallel {
                planner
                    .compute_parallel(&demo.source, &demo.targets, &demo.constraints)
                    .await?
            } else {
                planner.compute(&demo.source, &demo.targets, &demo.constraints)?
            };

            match &outcome {
                PlanOutcome::Solved(plan) => println!("Optimal plan:\n{}", plan),
                PlanOutcome::TimedOut(Some(plan)) => {
                    println!("Best plan found before the timeout:\n{}", plan)
                }
                PlanOutcome::TimedOut(None) => println!("No plan found before the timeout"),
                PlanOutcome::Infeasible => println!("The request has no solution"),
            }
            if let Some(plan) = outcome.plan() {
                println!(
                    "{} actions, duration {}, cost {}",
                    plan.len(),
                    plan.duration(),
                    plan.cost()
                );
            }

            if json {
                let stats = serde_json::to_string_pretty(planner.statistics())
                    .map_err(|e| PlanError::internal(format!("statistics encoding: {}", e)))?;
                println!("{}", stats);
            } else {
                for (i, stats) in planner.statistics().iter().enumerate() {
                    println!("partition {}: {}", i + 1, stats);
                }
            }
        }
    }

    Ok(())
}
