//! Unit convention for the engine.
//!
//! Everything inside the engine is stored in nm, ps, amu, elementary charges,
//! kelvin and kJ/mol. Quantities that are usually written in other units at
//! the configuration boundary carry their unit in the type and are converted
//! exactly once.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Boltzmann constant in kJ/(mol·K).
pub const BOLTZMANN: f64 = 0.008_314_462_618;

/// Coulomb prefactor 1/(4πε₀) in kJ·nm/(mol·e²).
pub const COULOMB: f64 = 138.935_456;

pub const NM_TO_ANGSTROM: f64 = 10.0;
pub const FS_TO_PS: f64 = 1e-3;
pub const PS_PER_NS: f64 = 1e3;
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// One AKMA time unit in picoseconds, used for the timestep field of DCD headers.
pub const AKMA_TIME_PS: f64 = 0.048_888_21;

/// Temperature in kelvin.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kelvin(pub f64);

/// Time interval in femtoseconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Femtoseconds(pub f64);

/// Rate in 1/ps, used for the Langevin friction coefficient.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InversePicoseconds(pub f64);

impl Kelvin {
    /// Thermal energy kT in kJ/mol.
    pub fn thermal_energy(self) -> f64 {
        BOLTZMANN * self.0
    }
}

impl Femtoseconds {
    pub fn to_picoseconds(self) -> f64 {
        self.0 * FS_TO_PS
    }
}

impl fmt::Display for Kelvin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} K", self.0)
    }
}

impl fmt::Display for Femtoseconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fs", self.0)
    }
}

impl fmt::Display for InversePicoseconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ps^-1", self.0)
    }
}

/// Simulated nanoseconds per wall-clock day.
pub fn ns_per_day(simulated_ps: f64, wall_seconds: f64) -> Option<f64> {
    if wall_seconds > 0.0 && simulated_ps > 0.0 {
        Some(simulated_ps / PS_PER_NS / (wall_seconds / SECONDS_PER_DAY))
    } else {
        None
    }
}
