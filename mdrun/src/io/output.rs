//! Output formatting and logging utilities

use color_eyre::eyre::{Result, WrapErr};
use md_engine::Topology;
use nalgebra::Vector3;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{
    fmt::format::Writer, fmt::layer, fmt::time::FormatTime, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

/// Wall time since the job started, as HH:MM:SS
struct RunClock {
    start: Instant,
}

impl FormatTime for RunClock {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let total_seconds = self.start.elapsed().as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds / 60) % 60;
        let seconds = total_seconds % 60;

        write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// Send the log to a file, or to stderr so it does not mix with the
/// statistics table on stdout
pub fn setup_output(output_path: Option<&String>) -> Result<()> {
    let timer = RunClock { start: Instant::now() };
    match output_path {
        Some(path) => {
            let log = File::create(path).wrap_err_with(|| format!("Could not create log file: {}", path))?;
            let file_layer = layer().with_writer(log).with_timer(timer).with_ansi(false);
            Registry::default().with(file_layer).init();
            info!("Log will be written to: {}", path);
        }
        None => {
            let stderr_layer = layer().with_writer(std::io::stderr).with_timer(timer).with_ansi(true);
            Registry::default().with(stderr_layer).init();
            info!("Log will be printed to stderr");
        }
    }
    Ok(())
}

/// Write the final coordinates as an XYZ block (ångström)
pub fn write_final_positions<W: Write>(
    writer: &mut W,
    topology: &Topology,
    positions: &[Vector3<f64>],
    energy: f64,
) -> Result<()> {
    writeln!(writer, "{}", positions.len())?;
    writeln!(writer, "Final potential energy: {:.6} kJ/mol", energy)?;
    for (atom, p) in topology.atoms().iter().zip(positions) {
        let p = p * md_engine::units::NM_TO_ANGSTROM;
        writeln!(writer, "{:<2} {:>12.6} {:>12.6} {:>12.6}", atom.symbol, p.x, p.y, p.z)?;
    }
    Ok(())
}
