use crate::config::AnalysisParams;
use color_eyre::eyre::{Result, WrapErr};
use md_engine::{Histogram, Observable, System, TrajectoryAnalyzer};
use std::path::Path;
use tracing::info;

/// Evaluate every requested observable over the trajectory and log a
/// histogram for each.
pub fn run_analysis(system: &System, trajectory: &Path, params: &AnalysisParams) -> Result<()> {
    info!("#####################################################");
    info!("---------------- Trajectory Analysis ----------------");
    info!("#####################################################");

    let analyzer = TrajectoryAnalyzer::open(trajectory, system.topology())
        .wrap_err_with(|| format!("Unable to open trajectory: {}", trajectory.display()))?;
    info!(
        "  {} frames of {} atoms, every {} steps from step {}",
        analyzer.header().frames,
        analyzer.header().n_atoms,
        analyzer.header().interval,
        analyzer.header().first_step
    );

    let bins = params.bins.unwrap_or(36);
    for &observable in &params.observables {
        let values = analyzer
            .collect(observable)
            .wrap_err_with(|| format!("Failed to evaluate {}", observable))?;
        if values.is_empty() {
            info!("\n{}: no frames", observable);
            continue;
        }
        let (scale, unit) = display_unit(observable);
        let scaled: Vec<f64> = values.iter().map(|v| v * scale).collect();
        let histogram = Histogram::new(&scaled, bins)?;
        let mean = scaled.iter().sum::<f64>() / scaled.len() as f64;

        info!("\n{}: {} values, mean {:.4} {}", observable, scaled.len(), mean, unit);
        for (center, count) in histogram.centers().iter().zip(histogram.counts()) {
            info!("  {:>10.4} {:<3} {:>6}", center, unit, count);
        }
    }
    Ok(())
}

/// Angles are reported in degrees, distances in nm.
fn display_unit(observable: Observable) -> (f64, &'static str) {
    match observable {
        Observable::Distance(_) => (1.0, "nm"),
        Observable::Angle(_) | Observable::Dihedral(_) => (180.0 / std::f64::consts::PI, "deg"),
    }
}
