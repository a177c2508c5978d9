//! Molecular dynamics job runner
//!
//! Reads a YAML job file (system, run settings and optional analysis), runs
//! minimization, equilibration and production, then summarises the trajectory.

mod app;
mod config;
mod io;

use app::MdApplication;
use color_eyre::eyre::Result;

fn main() -> Result<()> {
    color_eyre::install()?;
    MdApplication::from_cli()?.run()
}
