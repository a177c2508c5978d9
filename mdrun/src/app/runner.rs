use super::report::{report_failure, report_protocol};
use super::system::PreparedSystem;
use color_eyre::eyre::{Result, WrapErr};
use md_engine::{run_protocol, ProtocolSummary, SimulationConfig};
use tracing::info;

/// Run minimization, equilibration and production. Statistics go to stdout.
pub fn run_simulation(prepared: &PreparedSystem, config: &SimulationConfig) -> Result<ProtocolSummary> {
    info!("#####################################################");
    info!("---------------- Starting MD Protocol ---------------");
    info!("#####################################################");
    info!("  Temperature: {}", config.temperature);
    info!("  Friction: {}", config.friction);
    info!("  Time step: {}", config.timestep);
    info!(
        "  Equilibration: {} steps, Production: {} steps",
        config.equilibration.steps, config.production.steps
    );
    info!("  Trajectory: {}", config.production.trajectory.display());

    let stdout = std::io::stdout();
    let mut console = stdout.lock();
    match run_protocol(&prepared.system, prepared.positions.clone(), config, &mut console) {
        Ok(summary) => {
            report_protocol(&prepared.system, &summary);
            Ok(summary)
        }
        Err(err) => {
            report_failure(&prepared.system, &err);
            Err(err).wrap_err("Simulation failed")
        }
    }
}
