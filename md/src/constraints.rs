//! Iterative SHAKE/RATTLE solver for fixed-distance constraints.

use crate::error::{MdError, Result};
use crate::topology::Constraint;
use nalgebra::Vector3;

pub const DEFAULT_TOLERANCE: f64 = 1e-5;
pub const DEFAULT_MAX_ITERATIONS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintSolver {
    /// Relative distance tolerance |r − d|/d.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for ConstraintSolver {
    fn default() -> Self {
        ConstraintSolver::new(DEFAULT_TOLERANCE, DEFAULT_MAX_ITERATIONS)
    }
}

impl ConstraintSolver {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        ConstraintSolver {
            tolerance,
            max_iterations,
        }
    }

    /// SHAKE: move `positions` until every constraint holds, correcting along
    /// the constraint vectors of `reference`.
    ///
    /// Returns the number of sweeps performed.
    pub fn apply_positions(
        &self,
        constraints: &[Constraint],
        inv_masses: &[f64],
        reference: &[Vector3<f64>],
        positions: &mut [Vector3<f64>],
    ) -> Result<usize> {
        if constraints.is_empty() {
            return Ok(0);
        }

        for iteration in 0..self.max_iterations {
            let violation = max_violation(constraints, positions);
            if !violation.is_finite() {
                return Err(MdError::NumericalInstability(
                    "constraint violation is not finite".to_string(),
                ));
            }
            if violation < self.tolerance {
                return Ok(iteration);
            }

            for c in constraints {
                let r = positions[c.i] - positions[c.j];
                let r_ref = reference[c.i] - reference[c.j];
                let diff = c.distance * c.distance - r.norm_squared();
                let denom = 2.0 * (inv_masses[c.i] + inv_masses[c.j]) * r.dot(&r_ref);
                if denom.abs() < f64::EPSILON {
                    return Err(MdError::NumericalInstability(format!(
                        "constraint {}-{} rotated perpendicular to its reference",
                        c.i, c.j
                    )));
                }
                let g = diff / denom;
                positions[c.i] += r_ref * (g * inv_masses[c.i]);
                positions[c.j] -= r_ref * (g * inv_masses[c.j]);
            }
        }

        let violation = max_violation(constraints, positions);
        if violation < self.tolerance {
            return Ok(self.max_iterations);
        }
        Err(MdError::ConstraintConvergence {
            iterations: self.max_iterations,
            max_violation: violation,
        })
    }

    /// RATTLE: remove the velocity components along each constraint.
    pub fn apply_velocities(
        &self,
        constraints: &[Constraint],
        inv_masses: &[f64],
        positions: &[Vector3<f64>],
        velocities: &mut [Vector3<f64>],
    ) -> Result<usize> {
        if constraints.is_empty() {
            return Ok(0);
        }

        let mut worst = f64::INFINITY;
        for iteration in 0..self.max_iterations {
            worst = 0.0;
            for c in constraints {
                let r = positions[c.i] - positions[c.j];
                let v = velocities[c.i] - velocities[c.j];
                let rv = r.dot(&v);
                worst = f64::max(worst, rv.abs() / (c.distance * c.distance));

                let k = rv / ((inv_masses[c.i] + inv_masses[c.j]) * r.norm_squared());
                velocities[c.i] -= r * (k * inv_masses[c.i]);
                velocities[c.j] += r * (k * inv_masses[c.j]);
            }
            if !worst.is_finite() {
                return Err(MdError::NumericalInstability(
                    "constrained velocity is not finite".to_string(),
                ));
            }
            if worst < self.tolerance {
                return Ok(iteration + 1);
            }
        }

        Err(MdError::ConstraintConvergence {
            iterations: self.max_iterations,
            max_violation: worst,
        })
    }
}

/// Largest relative deviation |r − d|/d over all constraints.
pub fn max_violation(constraints: &[Constraint], positions: &[Vector3<f64>]) -> f64 {
    constraints
        .iter()
        .map(|c| ((positions[c.i] - positions[c.j]).norm() - c.distance).abs() / c.distance)
        .fold(0.0, f64::max)
}
