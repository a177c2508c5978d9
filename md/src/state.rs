//! Dynamic state of a simulation and the thermodynamic observables derived
//! from it.

use crate::error::{MdError, Result};
use crate::forcefield::ForceProvider;
use crate::topology::System;
use crate::units::{Kelvin, BOLTZMANN};
use itertools::izip;
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::StandardNormal;

/// Positions (nm), velocities (nm/ps) and the forces consistent with them.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub positions: Vec<Vector3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
    pub forces: Vec<Vector3<f64>>,
    /// kJ/mol, evaluated at `positions`.
    pub potential_energy: f64,
    /// Steps completed since the simulation was created.
    pub step: u64,
    /// Simulated time in ps.
    pub time: f64,
}

impl State {
    /// State at rest with forces evaluated at `positions`.
    pub fn new(system: &System, positions: Vec<Vector3<f64>>) -> Result<Self> {
        if positions.len() != system.n_atoms() {
            return Err(MdError::Topology(format!(
                "{} positions given for {} atoms",
                positions.len(),
                system.n_atoms()
            )));
        }
        if let Some(atom) = positions.iter().position(|p| !p.iter().all(|c| c.is_finite())) {
            return Err(MdError::NumericalInstability(format!(
                "initial position of atom {} is not finite",
                atom
            )));
        }
        let eval = system.force_field().evaluate(&positions)?;
        Ok(State {
            velocities: vec![Vector3::zeros(); positions.len()],
            positions,
            forces: eval.forces,
            potential_energy: eval.potential_energy,
            step: 0,
            time: 0.0,
        })
    }

    /// Re-evaluate forces and energy at the current positions.
    pub fn refresh_forces(&mut self, system: &System) -> Result<()> {
        let eval = system.force_field().evaluate(&self.positions)?;
        self.forces = eval.forces;
        self.potential_energy = eval.potential_energy;
        Ok(())
    }

    pub fn kinetic_energy(&self, masses: &[f64]) -> f64 {
        kinetic_energy(&self.velocities, masses)
    }

    pub fn is_finite(&self) -> bool {
        self.potential_energy.is_finite()
            && self
                .positions
                .iter()
                .chain(&self.velocities)
                .all(|v| v.iter().all(|c| c.is_finite()))
    }
}

pub fn kinetic_energy(velocities: &[Vector3<f64>], masses: &[f64]) -> f64 {
    velocities
        .iter()
        .zip(masses)
        .map(|(v, &m)| 0.5 * m * v.dot(v))
        .sum()
}

/// Degrees of freedom: 3N minus one per constraint, minus three when the
/// centre-of-mass motion is removed. Never less than one.
pub fn degrees_of_freedom(system: &System, remove_com: bool) -> usize {
    let total = 3 * system.n_atoms();
    let removed = system.constraints().len() + if remove_com { 3 } else { 0 };
    total.saturating_sub(removed).max(1)
}

/// Instantaneous temperature `2 KE / (dof k_B)`.
pub fn temperature(kinetic_energy: f64, dof: usize) -> f64 {
    2.0 * kinetic_energy / (dof as f64 * BOLTZMANN)
}

/// Draw velocities from the Maxwell-Boltzmann distribution at `temperature`.
pub fn maxwell_boltzmann<R: Rng>(masses: &[f64], temperature: Kelvin, rng: &mut R) -> Vec<Vector3<f64>> {
    let kt = temperature.thermal_energy();
    masses
        .iter()
        .map(|&m| {
            let sigma = (kt / m).sqrt();
            Vector3::new(
                rng.sample::<f64, _>(StandardNormal),
                rng.sample::<f64, _>(StandardNormal),
                rng.sample::<f64, _>(StandardNormal),
            ) * sigma
        })
        .collect()
}

/// Subtract the mass-weighted mean velocity so the total momentum is zero.
pub fn remove_com_velocity(velocities: &mut [Vector3<f64>], masses: &[f64]) {
    let total_mass: f64 = masses.iter().sum();
    if total_mass <= 0.0 {
        return;
    }
    let momentum: Vector3<f64> = izip!(velocities.iter(), masses)
        .map(|(v, &m)| v * m)
        .sum();
    let v_com = momentum / total_mass;
    for v in velocities.iter_mut() {
        *v -= v_com;
    }
}

/// Rescale velocities so the instantaneous temperature equals `target`.
pub fn rescale_to_temperature(velocities: &mut [Vector3<f64>], masses: &[f64], dof: usize, target: Kelvin) {
    let current = temperature(kinetic_energy(velocities, masses), dof);
    if current > 0.0 {
        let scale = (target.0 / current).sqrt();
        for v in velocities.iter_mut() {
            *v *= scale;
        }
    }
}
