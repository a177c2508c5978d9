//! Job file structures for MD runs
//!
//! A job file holds the system description, the run settings understood by
//! [`SimulationConfig`] and an optional analysis section.

mod args;

pub use args::Args;

use md_engine::topology::ConstraintMode;
use md_engine::{NonbondedSettings, Observable, SimulationConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Main configuration structure for an MD job
#[derive(Debug, Deserialize, Serialize)]
pub struct JobConfig {
    pub system: SystemParams,
    pub simulation: SimulationConfig,
    pub analysis: Option<AnalysisParams>,
}

/// Atoms, bonded terms and nonbonded settings of the simulated system
#[derive(Debug, Deserialize, Serialize)]
pub struct SystemParams {
    pub atoms: Vec<AtomParams>,
    #[serde(default)]
    pub bonds: Vec<BondParams>,
    #[serde(default)]
    pub angles: Vec<AngleParams>,
    #[serde(default)]
    pub torsions: Vec<TorsionParams>,
    #[serde(default)]
    pub exclusions: Vec<[usize; 2]>,
    /// Which bonds become rigid constraints
    #[serde(default)]
    pub constraints: ConstraintMode,
    #[serde(default)]
    pub nonbonded: NonbondedSettings,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AtomParams {
    pub element: String,
    /// amu
    pub mass: f64,
    /// e
    #[serde(default)]
    pub charge: f64,
    /// nm
    pub sigma: f64,
    /// kJ/mol
    pub epsilon: f64,
    /// nm
    pub position: [f64; 3],
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BondParams {
    pub atoms: [usize; 2],
    /// nm
    pub length: f64,
    /// kJ/mol/nm²
    pub k: f64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AngleParams {
    pub atoms: [usize; 3],
    /// degrees
    pub theta0: f64,
    /// kJ/mol/rad²
    pub k: f64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TorsionParams {
    pub atoms: [usize; 4],
    pub periodicity: u32,
    /// degrees
    #[serde(default)]
    pub phase: f64,
    /// kJ/mol
    pub amplitude: f64,
}

/// Observables to compute from the production trajectory
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisParams {
    pub observables: Vec<Observable>,
    pub bins: Option<usize>,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        AnalysisParams {
            observables: Vec::new(),
            bins: Some(36),
        }
    }
}

impl AnalysisParams {
    /// Apply default values to any missing parameters
    pub fn with_defaults(mut self) -> Self {
        if self.bins.is_none() {
            self.bins = Self::default().bins;
        }
        self
    }
}

impl JobConfig {
    pub fn with_defaults(mut self) -> Self {
        self.analysis = self.analysis.map(AnalysisParams::with_defaults);
        self
    }

    /// Apply command-line overrides on top of the job file
    pub fn apply_overrides(&mut self, args: &Args) {
        let sim = &mut self.simulation;
        if let Some(seed) = args.seed {
            info!("Overriding seed with: {}", seed);
            sim.seed = Some(seed);
        }
        if let Some(steps) = args.equilibration_steps {
            info!("Overriding equilibration steps with: {}", steps);
            sim.equilibration.steps = steps;
        }
        if let Some(steps) = args.production_steps {
            info!("Overriding production steps with: {}", steps);
            sim.production.steps = steps;
        }
        if let Some(path) = &args.trajectory {
            info!("Overriding trajectory path with: {}", path.display());
            sim.production.trajectory = path.clone();
        }
        if args.no_analysis && self.analysis.take().is_some() {
            info!("Trajectory analysis disabled from the command line");
        }
    }
}
