mod analysis;
mod report;
mod runner;
mod system;

pub use analysis::run_analysis;
pub use runner::run_simulation;
pub use system::{build_system, PreparedSystem};

use crate::config::{Args, JobConfig};
use crate::io::setup_output;
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use std::fs;
use tracing::info;

pub struct MdApplication {
    args: Args,
    config: JobConfig,
}

impl MdApplication {
    pub fn from_cli() -> Result<Self> {
        let args = Args::parse();
        let config = load_config(&args)?;
        Ok(Self { args, config })
    }

    pub fn run(mut self) -> Result<()> {
        setup_output(self.args.output.as_ref())?;
        info!("Reading configuration from: {}", self.args.config_file);
        self.config.apply_overrides(&self.args);

        let prepared = build_system(&self.config.system)?;
        let summary = run_simulation(&prepared, &self.config.simulation)?;

        match (&self.config.analysis, summary.production.is_some()) {
            (Some(params), true) => {
                run_analysis(&prepared.system, &self.config.simulation.production.trajectory, params)?;
            }
            (Some(_), false) => info!("Skipping analysis: no production trajectory was recorded"),
            (None, _) => {}
        }

        Ok(())
    }
}

fn load_config(args: &Args) -> Result<JobConfig> {
    let config_content = fs::read_to_string(&args.config_file)
        .wrap_err_with(|| format!("Unable to read configuration file: {}", args.config_file))?;

    let config = serde_yml::from_str::<JobConfig>(&config_content)
        .wrap_err("Failed to parse configuration file")?
        .with_defaults();

    Ok(config)
}
