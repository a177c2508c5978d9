//! Command-line argument parsing for MD jobs

use clap::Parser;
use std::path::PathBuf;

/// Minimize, equilibrate and run production dynamics from a YAML job file
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML job file
    #[arg(short, long, default_value = "job.yaml")]
    pub config_file: String,

    /// Write the log to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<String>,

    /// Override the random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the number of equilibration steps
    #[arg(long)]
    pub equilibration_steps: Option<u64>,

    /// Override the number of production steps
    #[arg(long)]
    pub production_steps: Option<u64>,

    /// Override the trajectory output path
    #[arg(long)]
    pub trajectory: Option<PathBuf>,

    /// Skip the trajectory analysis even if the job file requests it
    #[arg(long)]
    pub no_analysis: bool,
}
