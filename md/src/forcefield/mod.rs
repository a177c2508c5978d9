//! Potential energy and forces for a frozen [`System`].
//!
//! The total energy is the sum of harmonic bonds, harmonic angles, periodic
//! torsions, Lennard-Jones and Coulomb terms. Evaluation is a pure function of
//! the positions: nothing is cached between calls.

mod bonded;
mod nonbonded;

use crate::error::{MdError, Result};
use crate::topology::System;
use nalgebra::Vector3;

/// Anything that can turn positions into an energy and per-atom forces.
pub trait ForceProvider {
    fn evaluate(&self, positions: &[Vector3<f64>]) -> Result<ForceEvaluation>;

    fn potential_energy(&self, positions: &[Vector3<f64>]) -> Result<f64> {
        Ok(self.evaluate(positions)?.potential_energy)
    }
}

/// Per-term energy breakdown in kJ/mol.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyTerms {
    pub bond: f64,
    pub angle: f64,
    pub torsion: f64,
    pub lennard_jones: f64,
    pub coulomb: f64,
}

impl EnergyTerms {
    pub fn total(&self) -> f64 {
        self.bond + self.angle + self.torsion + self.lennard_jones + self.coulomb
    }
}

#[derive(Debug, Clone)]
pub struct ForceEvaluation {
    /// Total potential energy in kJ/mol.
    pub potential_energy: f64,
    /// Forces in kJ/mol/nm, one per atom.
    pub forces: Vec<Vector3<f64>>,
    pub terms: EnergyTerms,
}

/// Force field bound to one system.
#[derive(Debug, Clone, Copy)]
pub struct ForceField<'a> {
    system: &'a System,
}

impl<'a> ForceField<'a> {
    pub fn new(system: &'a System) -> Self {
        ForceField { system }
    }
}

impl System {
    pub fn force_field(&self) -> ForceField<'_> {
        ForceField::new(self)
    }
}

impl ForceProvider for ForceField<'_> {
    fn evaluate(&self, positions: &[Vector3<f64>]) -> Result<ForceEvaluation> {
        let n = self.system.n_atoms();
        if positions.len() != n {
            return Err(MdError::Topology(format!(
                "expected {} positions, got {}",
                n,
                positions.len()
            )));
        }

        let mut forces = vec![Vector3::zeros(); n];
        let mut terms = EnergyTerms::default();

        for bond in self.system.harmonic_bonds() {
            terms.bond += bonded::harmonic_bond(bond, positions, &mut forces);
        }
        for angle in self.system.angles() {
            terms.angle += bonded::harmonic_angle(angle, positions, &mut forces);
        }
        for torsion in self.system.torsions() {
            terms.torsion += bonded::periodic_torsion(torsion, positions, &mut forces);
        }

        let nonbonded = nonbonded::evaluate(self.system, positions);
        terms.lennard_jones = nonbonded.lennard_jones;
        terms.coulomb = nonbonded.coulomb;
        for (f, f_nb) in forces.iter_mut().zip(&nonbonded.forces) {
            *f += f_nb;
        }

        let potential_energy = terms.total();
        if !potential_energy.is_finite() {
            return Err(MdError::NumericalInstability(format!(
                "potential energy is {} (bond {}, angle {}, torsion {}, LJ {}, Coulomb {})",
                potential_energy, terms.bond, terms.angle, terms.torsion, terms.lennard_jones, terms.coulomb
            )));
        }
        if let Some(atom) = forces.iter().position(|f| !f.iter().all(|c| c.is_finite())) {
            return Err(MdError::NumericalInstability(format!(
                "non-finite force on atom {}",
                atom
            )));
        }

        Ok(ForceEvaluation {
            potential_energy,
            forces,
            terms,
        })
    }
}

/// Central-difference forces, used to check analytic gradients.
pub fn numerical_forces<F: ForceProvider>(
    provider: &F,
    positions: &[Vector3<f64>],
    delta: f64,
) -> Result<Vec<Vector3<f64>>> {
    let mut displaced = positions.to_vec();
    let mut forces = vec![Vector3::zeros(); positions.len()];

    for atom in 0..positions.len() {
        for dim in 0..3 {
            displaced[atom][dim] = positions[atom][dim] + delta;
            let plus = provider.potential_energy(&displaced)?;
            displaced[atom][dim] = positions[atom][dim] - delta;
            let minus = provider.potential_energy(&displaced)?;
            displaced[atom][dim] = positions[atom][dim];

            forces[atom][dim] = -(plus - minus) / (2.0 * delta);
        }
    }

    Ok(forces)
}
