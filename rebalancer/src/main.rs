//! CLI entry point for the cube rebalancer.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use cube_rebalancer::config::Config;
use cube_rebalancer::error::Error;
use cube_rebalancer::execution::{self, RunOptions};
use cube_rebalancer::snapshot::CubeSnapshot;

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Cube rebalancer: allocation solver and order planner")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Solve, confirm, and commit targets, orders and transfers
    Run {
        /// Path to the cube snapshot JSON
        snapshot: PathBuf,

        /// Show the plan without committing
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt (for automation/cron)
        #[arg(long)]
        force: bool,

        /// Output file (default: <snapshot>.plan.json)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Solve and show the allocation only
    Solve {
        snapshot: PathBuf,
    },

    /// Validate a snapshot and report which regimes are feasible
    Check {
        snapshot: PathBuf,
    },

    /// Compare current weights against the target allocation
    Drift {
        snapshot: PathBuf,
    },
}

fn load_snapshot(path: &Path) -> CubeSnapshot {
    match CubeSnapshot::load(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading snapshot: {e}");
            process::exit(1);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {e}");
                process::exit(1);
            }
        }
    } else {
        log::info!("{} not found, using defaults", cli.config.display());
        Config::default()
    };

    let result = match cli.command {
        Command::Run {
            snapshot,
            dry_run,
            force,
            out,
        } => {
            let cube = load_snapshot(&snapshot);
            let opts = RunOptions {
                dry_run,
                force,
                snapshot_file: snapshot.display().to_string(),
                out: out.unwrap_or_else(|| execution::default_output_path(&snapshot)),
            };
            execution::run(&config, &cube, &opts)
        }
        Command::Solve { snapshot } => execution::show_solution(&config, &load_snapshot(&snapshot)),
        Command::Check { snapshot } => execution::check(&load_snapshot(&snapshot)),
        Command::Drift { snapshot } => execution::show_drift(&config, &load_snapshot(&snapshot)),
    };

    if let Err(e) = result {
        if e.is_no_solution() {
            eprintln!("\nNo solution: {e}");
            process::exit(2);
        }
        match &e {
            Error::Aborted(msg) => {
                eprintln!("{msg}");
                process::exit(0);
            }
            _ => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}
