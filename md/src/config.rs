use crate::constraints::{ConstraintSolver, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE};
use crate::error::{MdError, Result};
use crate::minimizer::MinimizerSettings;
use crate::units::{Femtoseconds, InversePicoseconds, Kelvin};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for a minimize → equilibrate → produce run
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Thermostat target temperature
    pub temperature: Kelvin,
    /// Langevin friction coefficient
    pub friction: InversePicoseconds,
    /// Integration time step
    pub timestep: Femtoseconds,
    /// Relative tolerance of the constraint solver
    #[serde(default = "default_constraint_tolerance")]
    pub constraint_tolerance: f64,
    #[serde(default = "default_constraint_max_iterations")]
    pub constraint_max_iterations: usize,
    #[serde(default)]
    pub minimization: MinimizerSettings,
    pub equilibration: EquilibrationConfig,
    pub production: ProductionConfig,
    /// Random seed for velocities and the thermostat; entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_remove_com_motion")]
    pub remove_com_motion: bool,
    /// Abort the run when a reporter fails instead of disabling it
    #[serde(default)]
    pub strict_reporters: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EquilibrationConfig {
    pub steps: u64,
    pub report_interval: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProductionConfig {
    pub steps: u64,
    pub report_interval: u64,
    pub trajectory_interval: u64,
    /// DCD file the coordinates are written to
    pub trajectory: PathBuf,
}

fn default_constraint_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_constraint_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_remove_com_motion() -> bool {
    true
}

impl SimulationConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| MdError::io(path.display().to_string(), e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: SimulationConfig = serde_yml::from_str(content)
            .map_err(|e| MdError::Configuration(format!("could not parse simulation config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yml::to_string(self)
            .map_err(|e| MdError::Configuration(format!("could not serialize simulation config: {}", e)))?;
        fs::write(path, content).map_err(|e| MdError::io(path.display().to_string(), e))
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        fn positive(value: f64, what: &str) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(MdError::Configuration(format!("{} must be positive, got {}", what, value)))
            }
        }
        fn nonzero(value: u64, what: &str) -> Result<()> {
            if value > 0 {
                Ok(())
            } else {
                Err(MdError::Configuration(format!("{} must be positive", what)))
            }
        }

        positive(self.timestep.0, "Time step")?;
        positive(self.temperature.0, "Temperature")?;
        positive(self.friction.0, "Friction coefficient")?;
        positive(self.constraint_tolerance, "Constraint tolerance")?;
        if self.constraint_max_iterations == 0 {
            return Err(MdError::Configuration(
                "Constraint iteration cap must be positive".to_string(),
            ));
        }
        self.minimization.validate()?;

        nonzero(self.equilibration.steps, "Equilibration steps")?;
        nonzero(self.equilibration.report_interval, "Equilibration report interval")?;
        nonzero(self.production.steps, "Production steps")?;
        nonzero(self.production.report_interval, "Production report interval")?;
        nonzero(self.production.trajectory_interval, "Trajectory interval")?;
        if self.production.trajectory.as_os_str().is_empty() {
            return Err(MdError::Configuration("Trajectory path must not be empty".to_string()));
        }

        Ok(())
    }

    /// Time step in ps.
    pub fn dt(&self) -> f64 {
        self.timestep.to_picoseconds()
    }

    pub fn constraint_solver(&self) -> ConstraintSolver {
        ConstraintSolver::new(self.constraint_tolerance, self.constraint_max_iterations)
    }
}
