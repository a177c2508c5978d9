use crate::io::write_final_positions;
use md_engine::{MinimizationReport, PhaseSummary, ProtocolSummary, RunError, System};
use nalgebra::Vector3;
use tracing::{error, info, warn};

pub fn report_protocol(system: &System, summary: &ProtocolSummary) {
    report_minimization(&summary.minimization);
    report_phase(&summary.equilibration);
    if let Some(production) = &summary.production {
        report_phase(production);
        info!("  Trajectory frames written: {}", summary.trajectory_frames);
    }
    if summary.cancelled() {
        warn!("Run was cancelled before completion");
    }
    log_positions(
        system,
        &summary.final_state.positions,
        summary.final_state.potential_energy,
    );
}

fn report_minimization(report: &MinimizationReport) {
    info!("\nMinimization: {} after {} iterations", report.termination, report.iterations);
    info!(
        "  Energy: {:.6} -> {:.6} kJ/mol",
        report.initial_energy, report.final_energy
    );
    info!(
        "  RMS force: {:.4} kJ/mol/nm, max force: {:.4} kJ/mol/nm",
        report.rms_force, report.max_force
    );
}

fn report_phase(phase: &PhaseSummary) {
    let speed = phase
        .ns_per_day
        .map_or_else(|| "--".to_string(), |s| format!("{:.3}", s));
    info!(
        "\n{}: {} steps (last step {}){}",
        phase.stage,
        phase.steps,
        phase.last_step,
        if phase.cancelled { ", cancelled" } else { "" }
    );
    info!(
        "  Final temperature: {:.2} K, potential energy: {:.6} kJ/mol",
        phase.final_temperature, phase.final_potential_energy
    );
    info!("  Wall time: {:.2} s, speed: {} ns/day", phase.wall_time.as_secs_f64(), speed);
}

pub fn report_failure(system: &System, err: &RunError) {
    error!(
        "{} stopped at step {} with {}: {}",
        err.stage,
        err.last_step,
        err.kind(),
        err.source
    );
    if let Some(frame) = &err.last_frame {
        info!("Last valid configuration (step {}, {:.4} ps):", frame.step, frame.time);
        log_positions(system, &frame.positions, f64::NAN);
    }
}

fn log_positions(system: &System, positions: &[Vector3<f64>], energy: f64) {
    let mut buffer = Vec::new();
    match write_final_positions(&mut buffer, system.topology(), positions, energy) {
        Ok(()) => info!("\n{}", String::from_utf8_lossy(&buffer)),
        Err(e) => warn!("Could not format coordinates: {}", e),
    }
}
