//! Local energy minimization before dynamics.
//!
//! L-BFGS with a backtracking line search over atomic positions, or plain
//! steepest descent. Every trial geometry is projected onto the constraint
//! manifold with SHAKE, and a step is only accepted when it lowers the
//! energy, so the energy history is strictly decreasing.

use crate::constraints::ConstraintSolver;
use crate::error::{MdError, Result};
use crate::forcefield::{ForceEvaluation, ForceProvider};
use crate::state::State;
use crate::topology::System;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 20;
const MIN_CURVATURE: f64 = 1e-12;
/// Force convergence also requires the RMS force to fall to this fraction of
/// its starting value, so soft systems are not accepted unrelaxed.
const RELATIVE_FORCE_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinimizerAlgorithm {
    #[default]
    Lbfgs,
    SteepestDescent,
}

impl FromStr for MinimizerAlgorithm {
    type Err = MdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lbfgs" | "l-bfgs" => Ok(Self::Lbfgs),
            "sd" | "steepest_descent" => Ok(Self::SteepestDescent),
            _ => Err(MdError::Configuration(format!("Unknown minimization algorithm: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinimizerSettings {
    #[serde(default)]
    pub algorithm: MinimizerAlgorithm,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Stop when the RMS projected force drops below this (kJ/mol/nm), or
    /// below a thousandth of the starting RMS force if that is smaller.
    #[serde(default = "default_force_tolerance")]
    pub force_tolerance: f64,
    /// Stop when an accepted step changes the energy by less than this (kJ/mol).
    #[serde(default = "default_energy_tolerance")]
    pub energy_tolerance: f64,
    /// Largest displacement of any atom in one step (nm).
    #[serde(default = "default_max_step")]
    pub max_step: f64,
    /// Number of correction pairs kept by L-BFGS.
    #[serde(default = "default_history")]
    pub history: usize,
}

fn default_max_iterations() -> usize {
    1000
}

fn default_force_tolerance() -> f64 {
    10.0
}

fn default_energy_tolerance() -> f64 {
    1e-6
}

fn default_max_step() -> f64 {
    0.01
}

fn default_history() -> usize {
    8
}

impl Default for MinimizerSettings {
    fn default() -> Self {
        MinimizerSettings {
            algorithm: MinimizerAlgorithm::default(),
            max_iterations: default_max_iterations(),
            force_tolerance: default_force_tolerance(),
            energy_tolerance: default_energy_tolerance(),
            max_step: default_max_step(),
            history: default_history(),
        }
    }
}

impl MinimizerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(MdError::Configuration(
                "Minimization iteration cap must be positive".to_string(),
            ));
        }
        if !(self.force_tolerance > 0.0) || !(self.energy_tolerance > 0.0) {
            return Err(MdError::Configuration(
                "Minimization tolerances must be positive".to_string(),
            ));
        }
        if !(self.max_step > 0.0) {
            return Err(MdError::Configuration(
                "Minimization step size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why the minimizer stopped. All of these are normal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    ForceConverged,
    EnergyConverged,
    /// No energy-lowering step was found along the steepest-descent direction.
    LineSearchExhausted,
    MaxIterations,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Termination::ForceConverged => "force converged",
            Termination::EnergyConverged => "energy converged",
            Termination::LineSearchExhausted => "line search exhausted",
            Termination::MaxIterations => "maximum iterations reached",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinimizationReport {
    pub iterations: usize,
    pub initial_energy: f64,
    pub final_energy: f64,
    pub rms_force: f64,
    pub max_force: f64,
    pub termination: Termination,
    /// Energy after every accepted iteration, starting with the initial energy.
    pub energies: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct EnergyMinimizer {
    settings: MinimizerSettings,
    solver: ConstraintSolver,
}

/// L-BFGS correction pairs.
struct History {
    capacity: usize,
    s: VecDeque<Vec<Vector3<f64>>>,
    y: VecDeque<Vec<Vector3<f64>>>,
    rho: VecDeque<f64>,
}

impl History {
    fn new(capacity: usize) -> Self {
        History {
            capacity,
            s: VecDeque::with_capacity(capacity),
            y: VecDeque::with_capacity(capacity),
            rho: VecDeque::with_capacity(capacity),
        }
    }

    fn clear(&mut self) {
        self.s.clear();
        self.y.clear();
        self.rho.clear();
    }

    fn is_empty(&self) -> bool {
        self.s.is_empty()
    }

    fn push(&mut self, s: Vec<Vector3<f64>>, y: Vec<Vector3<f64>>) {
        if self.capacity == 0 {
            return;
        }
        let sy = dot(&s, &y);
        if sy <= MIN_CURVATURE {
            return;
        }
        if self.s.len() == self.capacity {
            self.s.pop_front();
            self.y.pop_front();
            self.rho.pop_front();
        }
        self.s.push_back(s);
        self.y.push_back(y);
        self.rho.push_back(1.0 / sy);
    }

    /// Two-loop recursion: returns −H·g.
    fn direction(&self, gradient: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let m = self.s.len();
        let mut q = gradient.to_vec();
        let mut alphas = vec![0.0; m];

        for i in (0..m).rev() {
            alphas[i] = self.rho[i] * dot(&self.s[i], &q);
            axpy(-alphas[i], &self.y[i], &mut q);
        }

        let gamma = match (self.s.back(), self.y.back()) {
            (Some(s), Some(y)) => dot(s, y) / dot(y, y),
            _ => 1.0,
        };
        let mut r: Vec<Vector3<f64>> = q.iter().map(|v| v * gamma).collect();

        for i in 0..m {
            let beta = self.rho[i] * dot(&self.y[i], &r);
            axpy(alphas[i] - beta, &self.s[i], &mut r);
        }

        r.iter().map(|v| -v).collect()
    }
}

fn dot(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x.dot(y)).sum()
}

fn axpy(alpha: f64, x: &[Vector3<f64>], y: &mut [Vector3<f64>]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += xi * alpha;
    }
}

/// RMS and maximum per-atom force magnitude.
pub fn force_metrics(forces: &[Vector3<f64>]) -> (f64, f64) {
    let mut max_force: f64 = 0.0;
    let mut sum_squared = 0.0;
    for force in forces {
        let norm = force.norm();
        max_force = max_force.max(norm);
        sum_squared += norm * norm;
    }
    let rms = if forces.is_empty() {
        0.0
    } else {
        (sum_squared / forces.len() as f64).sqrt()
    };
    (rms, max_force)
}

impl EnergyMinimizer {
    pub fn new(settings: MinimizerSettings, solver: ConstraintSolver) -> Self {
        EnergyMinimizer { settings, solver }
    }

    pub fn settings(&self) -> &MinimizerSettings {
        &self.settings
    }

    /// Remove the components of `vectors` that would change a constrained distance.
    fn project(&self, system: &System, positions: &[Vector3<f64>], vectors: &mut [Vector3<f64>]) -> Result<()> {
        if system.constraints().is_empty() {
            return Ok(());
        }
        let unit = vec![1.0; positions.len()];
        self.solver
            .apply_velocities(system.constraints(), &unit, positions, vectors)?;
        Ok(())
    }

    /// Relax `state.positions` in place. Forces and potential energy in
    /// `state` are updated to the final geometry; velocities are untouched.
    pub fn minimize(&self, system: &System, state: &mut State) -> Result<MinimizationReport> {
        self.settings.validate()?;
        let ff = system.force_field();
        let constraints = system.constraints();
        let inv_masses = system.inverse_masses();

        let mut x = state.positions.clone();
        if !constraints.is_empty() {
            let reference = x.clone();
            self.solver.apply_positions(constraints, inv_masses, &reference, &mut x)?;
        }

        let eval = ff.evaluate(&x)?;
        let mut energy = eval.potential_energy;
        let mut forces = eval.forces;
        self.project(system, &x, &mut forces)?;
        let mut gradient: Vec<Vector3<f64>> = forces.iter().map(|f| -f).collect();

        let initial_energy = energy;
        let mut energies = vec![energy];
        let mut history = History::new(match self.settings.algorithm {
            MinimizerAlgorithm::Lbfgs => self.settings.history,
            MinimizerAlgorithm::SteepestDescent => 0,
        });

        tracing::info!("#####################################################");
        tracing::info!("------------- Starting Energy Minimization ----------");
        tracing::info!("#####################################################");
        tracing::info!("  Initial energy: {:.6} kJ/mol", energy);

        let mut termination = Termination::MaxIterations;
        let mut iterations = 0;
        let (mut rms_force, mut max_force) = force_metrics(&forces);
        let force_tolerance = self.settings.force_tolerance.min(rms_force * RELATIVE_FORCE_TOLERANCE);

        while iterations < self.settings.max_iterations {
            if rms_force <= force_tolerance {
                termination = Termination::ForceConverged;
                break;
            }
            iterations += 1;

            let mut direction = history.direction(&gradient);
            self.project(system, &x, &mut direction)?;
            let mut slope = dot(&gradient, &direction);
            if !(slope < 0.0) {
                tracing::debug!("  Iteration {}: not a descent direction, resetting history", iterations);
                history.clear();
                direction = forces.clone();
                slope = dot(&gradient, &direction);
            }

            let accepted = match self.line_search(system, &x, energy, &direction, slope)? {
                Some(accepted) => accepted,
                None if !history.is_empty() => {
                    tracing::debug!("  Iteration {}: line search failed, resetting history", iterations);
                    history.clear();
                    continue;
                }
                None => {
                    termination = Termination::LineSearchExhausted;
                    break;
                }
            };

            let (x_new, eval) = accepted;
            let mut forces_new = eval.forces;
            self.project(system, &x_new, &mut forces_new)?;
            let gradient_new: Vec<Vector3<f64>> = forces_new.iter().map(|f| -f).collect();

            let s: Vec<Vector3<f64>> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
            let y: Vec<Vector3<f64>> = gradient_new.iter().zip(&gradient).map(|(a, b)| a - b).collect();
            history.push(s, y);

            let energy_change = eval.potential_energy - energy;
            x = x_new;
            energy = eval.potential_energy;
            forces = forces_new;
            gradient = gradient_new;
            energies.push(energy);
            (rms_force, max_force) = force_metrics(&forces);

            tracing::debug!(
                "  Iteration {}: energy {:.6} kJ/mol, change {:.3e}, RMS force {:.4}, max force {:.4}",
                iterations,
                energy,
                energy_change,
                rms_force,
                max_force
            );

            if rms_force <= force_tolerance {
                termination = Termination::ForceConverged;
                break;
            }
            if energy_change.abs() < self.settings.energy_tolerance {
                termination = Termination::EnergyConverged;
                break;
            }
        }

        tracing::info!("  Minimization finished after {} iterations: {}", iterations, termination);
        tracing::info!("  Final energy: {:.6} kJ/mol, RMS force {:.4} kJ/mol/nm", energy, rms_force);
        tracing::info!("-----------------------------------------------------\n");

        state.positions = x;
        state.refresh_forces(system)?;

        Ok(MinimizationReport {
            iterations,
            initial_energy,
            final_energy: state.potential_energy,
            rms_force,
            max_force,
            termination,
            energies,
        })
    }

    /// Backtracking Armijo search along `direction`, first step capped at
    /// `max_step` per atom. Returns the accepted geometry and its evaluation.
    ///
    /// Trial geometries the constraint solver or force field cannot handle
    /// count as rejected steps. If every trial failed that way the last such
    /// error is returned instead of `None`.
    fn line_search(
        &self,
        system: &System,
        x: &[Vector3<f64>],
        energy: f64,
        direction: &[Vector3<f64>],
        slope: f64,
    ) -> Result<Option<(Vec<Vector3<f64>>, ForceEvaluation)>> {
        let largest = direction.iter().map(|d| d.norm()).fold(0.0, f64::max);
        if !(largest > 0.0) {
            return Ok(None);
        }
        let mut alpha = f64::min(1.0, self.settings.max_step / largest);
        let constraints = system.constraints();
        let mut last_error = None;
        let mut evaluated = false;

        for _ in 0..MAX_BACKTRACKS {
            let mut trial: Vec<Vector3<f64>> = x.iter().zip(direction).map(|(p, d)| p + d * alpha).collect();
            if !constraints.is_empty() {
                if let Err(e) = self
                    .solver
                    .apply_positions(constraints, system.inverse_masses(), x, &mut trial)
                {
                    tracing::debug!("  Trial step {:.3e} rejected: {}", alpha, e);
                    last_error = Some(e);
                    alpha *= 0.5;
                    continue;
                }
            }

            let eval = match system.force_field().evaluate(&trial) {
                Ok(eval) => eval,
                Err(e @ MdError::NumericalInstability(_)) => {
                    tracing::debug!("  Trial step {:.3e} rejected: {}", alpha, e);
                    last_error = Some(e);
                    alpha *= 0.5;
                    continue;
                }
                Err(e) => return Err(e),
            };
            evaluated = true;

            // Armijo alone admits an unchanged energy once the decrease
            // drops below rounding.
            if eval.potential_energy < energy && eval.potential_energy <= energy + ARMIJO_C1 * alpha * slope {
                return Ok(Some((trial, eval)));
            }
            alpha *= 0.5;
        }
        match last_error {
            Some(e) if !evaluated => Err(e),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::max_violation;
    use crate::topology::SystemBuilder;
    use approx::assert_relative_eq;
    use periodic_table_on_an_enum::Element;

    fn stretched_dimer(k: f64) -> (System, State) {
        let mut builder = SystemBuilder::new();
        builder.add_atom(Element::Carbon, 12.0, 0.0, 0.0, 0.0);
        builder.add_atom(Element::Carbon, 12.0, 0.0, 0.0, 0.0);
        builder.add_bond(0, 1, 0.15, k);
        let system = builder.build().unwrap();
        let state = State::new(&system, vec![Vector3::zeros(), Vector3::new(0.20, 0.0, 0.0)]).unwrap();
        (system, state)
    }

    #[test]
    fn test_dimer_relaxes_to_bond_length() {
        let (system, mut state) = stretched_dimer(2.5e5);
        let report = EnergyMinimizer::new(MinimizerSettings::default(), ConstraintSolver::default())
            .minimize(&system, &mut state)
            .unwrap();

        let r = (state.positions[1] - state.positions[0]).norm();
        assert!((r - 0.15).abs() < 1e-4, "r = {}", r);
        assert!(report.iterations <= 100);
        assert!(report.final_energy < report.initial_energy);
    }

    #[test]
    fn test_soft_and_stiff_bonds_reach_bond_length() {
        for k in [10.0, 100.0, 1000.0, 2.5e4, 2.5e5] {
            let (system, mut state) = stretched_dimer(k);
            let report = EnergyMinimizer::new(MinimizerSettings::default(), ConstraintSolver::default())
                .minimize(&system, &mut state)
                .unwrap();

            let r = (state.positions[1] - state.positions[0]).norm();
            assert!((r - 0.15).abs() < 1e-4, "k = {}: r = {} after {} iterations", k, r, report.iterations);
            assert!(report.iterations > 0 && report.iterations <= 100, "k = {}", k);
        }
    }

    #[test]
    fn test_line_search_reports_constraint_failure() {
        let mut builder = SystemBuilder::new();
        builder.add_atom(Element::Oxygen, 16.0, 0.0, 0.0, 0.0);
        builder.add_atom(Element::Hydrogen, 1.008, 0.0, 0.0, 0.0);
        builder.add_constraint(0, 1, 0.1);
        let system = builder.build().unwrap();
        let x = vec![Vector3::zeros(), Vector3::new(0.1, 0.0, 0.0)];
        // Pure stretch: one SHAKE sweep always leaves a second-order residual.
        let direction = vec![Vector3::new(-1.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)];

        let minimizer = EnergyMinimizer::new(MinimizerSettings::default(), ConstraintSolver::new(1e-15, 1));
        let err = minimizer.line_search(&system, &x, 0.0, &direction, -1.0).err().unwrap();
        assert!(matches!(err, MdError::ConstraintConvergence { iterations: 1, .. }));

        let minimizer = EnergyMinimizer::new(MinimizerSettings::default(), ConstraintSolver::default());
        assert!(minimizer.line_search(&system, &x, 0.0, &direction, -1.0).unwrap().is_none());
    }

    #[test]
    fn test_energy_never_increases() {
        let mut builder = SystemBuilder::new();
        for i in 0..6 {
            let q = if i % 2 == 0 { 0.3 } else { -0.3 };
            builder.add_atom(Element::Carbon, 12.0, q, 0.34, 0.4);
        }
        for i in 0..5 {
            builder.add_bond(i, i + 1, 0.153, 2.0e5);
        }
        for i in 0..4 {
            builder.add_angle(i, i + 1, i + 2, 1.91, 400.0);
        }
        builder.add_torsion(0, 1, 2, 3, 3, 0.0, 1.0);
        let system = builder.build().unwrap();
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.17, 0.02, 0.0),
            Vector3::new(0.22, 0.18, 0.03),
            Vector3::new(0.40, 0.20, -0.05),
            Vector3::new(0.45, 0.33, 0.06),
            Vector3::new(0.61, 0.37, 0.12),
        ];
        let mut state = State::new(&system, positions).unwrap();

        for algorithm in [MinimizerAlgorithm::Lbfgs, MinimizerAlgorithm::SteepestDescent] {
            let mut state = state.clone();
            let settings = MinimizerSettings {
                algorithm,
                max_iterations: 200,
                ..MinimizerSettings::default()
            };
            let report = EnergyMinimizer::new(settings, ConstraintSolver::default())
                .minimize(&system, &mut state)
                .unwrap();
            for pair in report.energies.windows(2) {
                assert!(pair[1] < pair[0]);
            }
        }
        let report = EnergyMinimizer::new(MinimizerSettings::default(), ConstraintSolver::default())
            .minimize(&system, &mut state)
            .unwrap();
        assert_relative_eq!(report.final_energy, state.potential_energy);
    }

    #[test]
    fn test_minimization_respects_constraints() {
        let mut builder = SystemBuilder::new();
        builder.add_atom(Element::Oxygen, 16.0, -0.8, 0.315, 0.636);
        builder.add_atom(Element::Hydrogen, 1.008, 0.4, 0.0, 0.0);
        builder.add_atom(Element::Hydrogen, 1.008, 0.4, 0.0, 0.0);
        builder.add_bond(0, 1, 0.09572, 4.6e5).add_bond(0, 2, 0.09572, 4.6e5);
        builder.add_angle(1, 0, 2, 1.824, 836.8);
        builder.constrain_hydrogen_bonds();
        let system = builder.build().unwrap();
        let mut state = State::new(
            &system,
            vec![
                Vector3::zeros(),
                Vector3::new(0.1, 0.0, 0.0),
                Vector3::new(-0.02, 0.095, 0.0),
            ],
        )
        .unwrap();

        let report = EnergyMinimizer::new(MinimizerSettings::default(), ConstraintSolver::new(1e-8, 500))
            .minimize(&system, &mut state)
            .unwrap();
        assert!(max_violation(system.constraints(), &state.positions) < 1e-6);
        assert!(report.final_energy <= report.initial_energy);
    }

    #[test]
    fn test_already_minimal_stops_immediately() {
        let (system, mut state) = stretched_dimer(2.5e5);
        state.positions[1] = Vector3::new(0.15, 0.0, 0.0);
        let report = EnergyMinimizer::new(MinimizerSettings::default(), ConstraintSolver::default())
            .minimize(&system, &mut state)
            .unwrap();
        assert_eq!(report.termination, Termination::ForceConverged);
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn test_iteration_cap_is_normal_termination() {
        let (system, mut state) = stretched_dimer(2.5e5);
        let settings = MinimizerSettings {
            max_iterations: 1,
            ..MinimizerSettings::default()
        };
        let report = EnergyMinimizer::new(settings, ConstraintSolver::default())
            .minimize(&system, &mut state)
            .unwrap();
        assert_eq!(report.termination, Termination::MaxIterations);
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("L-BFGS".parse::<MinimizerAlgorithm>().unwrap(), MinimizerAlgorithm::Lbfgs);
        assert_eq!("sd".parse::<MinimizerAlgorithm>().unwrap(), MinimizerAlgorithm::SteepestDescent);
        assert!("newton".parse::<MinimizerAlgorithm>().is_err());
    }
}
