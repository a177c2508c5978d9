//! Reporters observe the simulation at fixed step intervals.
//!
//! Each phase builds its own [`ReporterSet`] and hands it to the driver, so
//! nothing outlives the phase it was registered for.

use crate::error::{MdError, Result};
use nalgebra::Vector3;
use std::io::Write;

/// Snapshot handed to reporters after a completed step.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Cumulative step number.
    pub step: u64,
    /// Simulated time in ps.
    pub time: f64,
    pub positions: &'a [Vector3<f64>],
    pub potential_energy: f64,
    pub kinetic_energy: f64,
    pub temperature: f64,
    /// Throughput since the phase started, in ns/day.
    pub speed: Option<f64>,
}

pub trait Reporter {
    /// Human-readable name used in log and error messages.
    fn name(&self) -> &str;

    /// Report every `interval` steps, counted from the start of the phase.
    fn interval(&self) -> u64;

    fn report(&mut self, frame: &Frame<'_>) -> Result<()>;

    /// Flush and release the sink. Called once when the phase ends, however it ends.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn interval(&self) -> u64 {
        (**self).interval()
    }

    fn report(&mut self, frame: &Frame<'_>) -> Result<()> {
        (**self).report(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

struct Entry<'a> {
    reporter: Box<dyn Reporter + 'a>,
    enabled: bool,
}

/// The reporters registered for one phase.
///
/// A failing reporter is disabled and the run continues, unless the set is
/// strict, in which case the error is returned to the driver.
pub struct ReporterSet<'a> {
    entries: Vec<Entry<'a>>,
    strict: bool,
}

impl<'a> ReporterSet<'a> {
    pub fn new(strict: bool) -> Self {
        ReporterSet {
            entries: Vec::new(),
            strict,
        }
    }

    pub fn add<R: Reporter + 'a>(&mut self, reporter: R) -> &mut Self {
        self.entries.push(Entry {
            reporter: Box::new(reporter),
            enabled: true,
        });
        self
    }

    pub fn with<R: Reporter + 'a>(mut self, reporter: R) -> Self {
        self.add(reporter);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active(&self) -> usize {
        self.entries.iter().filter(|e| e.enabled).count()
    }

    /// Whether any enabled reporter wants a frame at this phase-relative step.
    pub fn is_due(&self, phase_step: u64) -> bool {
        self.entries
            .iter()
            .any(|e| e.enabled && is_due(e.reporter.interval(), phase_step))
    }

    pub fn report(&mut self, phase_step: u64, frame: &Frame<'_>) -> Result<()> {
        let strict = self.strict;
        for entry in self.entries.iter_mut() {
            if !entry.enabled || !is_due(entry.reporter.interval(), phase_step) {
                continue;
            }
            if let Err(e) = entry.reporter.report(frame) {
                handle_failure(entry, e, strict)?;
            }
        }
        Ok(())
    }

    /// Finish every reporter. All reporters are finished even when one fails;
    /// the first failure is returned in strict mode.
    pub fn finish(&mut self) -> Result<()> {
        let strict = self.strict;
        let mut first_error = None;
        for entry in self.entries.iter_mut() {
            if let Err(e) = entry.reporter.finish() {
                if let Err(e) = handle_failure(entry, e, strict) {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn is_due(interval: u64, phase_step: u64) -> bool {
    interval > 0 && phase_step > 0 && phase_step % interval == 0
}

fn handle_failure(entry: &mut Entry<'_>, error: MdError, strict: bool) -> Result<()> {
    if strict {
        return Err(error);
    }
    if entry.enabled {
        tracing::warn!("Reporter '{}' failed and was disabled: {}", entry.reporter.name(), error);
    }
    entry.enabled = false;
    Ok(())
}

/// Which columns a [`StatisticsReporter`] prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticsLayout {
    /// Step, potential energy and temperature.
    Equilibration,
    /// Adds simulated time and throughput.
    Production,
}

impl StatisticsLayout {
    pub fn header(self) -> &'static str {
        match self {
            StatisticsLayout::Equilibration => r#"#"Step","Potential Energy (kJ/mole)","Temperature (K)""#,
            StatisticsLayout::Production => {
                r#"#"Step","Time (ps)","Potential Energy (kJ/mole)","Temperature (K)","Speed (ns/day)""#
            }
        }
    }
}

/// Comma-separated statistics, one line per report, header before the first line.
pub struct StatisticsReporter<W: Write> {
    sink: W,
    name: String,
    interval: u64,
    layout: StatisticsLayout,
    wrote_header: bool,
}

impl<W: Write> StatisticsReporter<W> {
    pub fn new(sink: W, interval: u64, layout: StatisticsLayout) -> Self {
        StatisticsReporter {
            sink,
            name: "statistics".to_string(),
            interval,
            layout,
            wrote_header: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn format_line(&self, frame: &Frame<'_>) -> String {
        match self.layout {
            StatisticsLayout::Equilibration => {
                format!("{},{},{}", frame.step, frame.potential_energy, frame.temperature)
            }
            StatisticsLayout::Production => {
                let speed = match frame.speed {
                    Some(speed) => format!("{:.3}", speed),
                    None => "--".to_string(),
                };
                format!(
                    "{},{:.4},{},{},{}",
                    frame.step, frame.time, frame.potential_energy, frame.temperature, speed
                )
            }
        }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> Reporter for StatisticsReporter<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> u64 {
        self.interval
    }

    fn report(&mut self, frame: &Frame<'_>) -> Result<()> {
        let line = self.format_line(frame);
        if !self.wrote_header {
            writeln!(self.sink, "{}", self.layout.header()).map_err(|e| MdError::io(self.name.clone(), e))?;
            self.wrote_header = true;
        }
        writeln!(self.sink, "{}", line).map_err(|e| MdError::io(self.name.clone(), e))
    }

    fn finish(&mut self) -> Result<()> {
        self.sink.flush().map_err(|e| MdError::io(self.name.clone(), e))
    }
}
