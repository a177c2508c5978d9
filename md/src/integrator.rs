//! Time integrators.
//!
//! Both integrators share one velocity-Verlet skeleton, split so that a
//! Langevin Ornstein-Uhlenbeck update can sit between the two half drifts.
//! A step works on a copy of the state and only replaces the caller's state
//! when every stage succeeded, so a failed step leaves no partial update.

use crate::constraints::ConstraintSolver;
use crate::error::{MdError, Result};
use crate::forcefield::ForceProvider;
use crate::state::{remove_com_velocity, State};
use crate::topology::System;
use crate::units::{InversePicoseconds, Kelvin};
use itertools::izip;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

pub trait Integrator {
    /// Advance `state` by `dt` ps. Step counters are left to the caller.
    fn step(&mut self, system: &System, state: &mut State, dt: f64) -> Result<()>;

    fn constraint_solver(&self) -> &ConstraintSolver;

    /// Whether centre-of-mass motion is removed after every step.
    fn removes_com_motion(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Stochastic velocity update applied between the two half drifts.
struct Thermostat<'a> {
    rng: &'a mut StdRng,
    kt: f64,
    friction: f64,
}

impl Thermostat<'_> {
    fn apply(&mut self, velocities: &mut [Vector3<f64>], masses: &[f64], dt: f64) {
        let c = (-self.friction * dt).exp();
        let noise_scale = (self.kt * (1.0 - c * c)).sqrt();
        for (v, &m) in velocities.iter_mut().zip(masses) {
            let xi = Vector3::new(
                self.rng.sample::<f64, _>(StandardNormal),
                self.rng.sample::<f64, _>(StandardNormal),
                self.rng.sample::<f64, _>(StandardNormal),
            );
            *v = *v * c + xi * (noise_scale / m.sqrt());
        }
    }
}

fn verlet_step(
    system: &System,
    state: &mut State,
    dt: f64,
    solver: &ConstraintSolver,
    remove_com: bool,
    mut thermostat: Option<Thermostat<'_>>,
) -> Result<()> {
    if !(dt > 0.0 && dt.is_finite()) {
        return Err(MdError::Configuration(format!("Time step must be positive, got {} ps", dt)));
    }

    let masses = system.masses();
    let inv_masses = system.inverse_masses();
    let constraints = system.constraints();
    let half_dt = 0.5 * dt;

    let mut next = state.clone();

    // B: half kick
    for (v, f, &inv_m) in izip!(&mut next.velocities, &next.forces, inv_masses) {
        *v += f * (inv_m * half_dt);
    }

    // A: half drift, O: friction and noise, A: half drift
    let unconstrained_start = next.positions.clone();
    for (x, v) in next.positions.iter_mut().zip(&next.velocities) {
        *x += v * half_dt;
    }
    if let Some(thermostat) = thermostat.as_mut() {
        thermostat.apply(&mut next.velocities, masses, dt);
    }
    for (x, v) in next.positions.iter_mut().zip(&next.velocities) {
        *x += v * half_dt;
    }

    if !constraints.is_empty() {
        let unconstrained = next.positions.clone();
        solver.apply_positions(constraints, inv_masses, &unconstrained_start, &mut next.positions)?;
        for (v, x_c, x_u) in izip!(&mut next.velocities, &next.positions, &unconstrained) {
            *v += (x_c - x_u) / dt;
        }
    }

    let eval = system.force_field().evaluate(&next.positions)?;
    next.forces = eval.forces;
    next.potential_energy = eval.potential_energy;

    // B: half kick
    for (v, f, &inv_m) in izip!(&mut next.velocities, &next.forces, inv_masses) {
        *v += f * (inv_m * half_dt);
    }
    solver.apply_velocities(constraints, inv_masses, &next.positions, &mut next.velocities)?;

    if remove_com {
        remove_com_velocity(&mut next.velocities, masses);
    }

    if !next.is_finite() {
        return Err(MdError::NumericalInstability(
            "positions or velocities became non-finite".to_string(),
        ));
    }

    *state = next;
    Ok(())
}

/// Constant-energy velocity Verlet with SHAKE/RATTLE.
#[derive(Debug, Clone)]
pub struct VelocityVerlet {
    solver: ConstraintSolver,
    remove_com: bool,
}

impl VelocityVerlet {
    pub fn new(solver: ConstraintSolver, remove_com: bool) -> Self {
        VelocityVerlet { solver, remove_com }
    }
}

impl Integrator for VelocityVerlet {
    fn step(&mut self, system: &System, state: &mut State, dt: f64) -> Result<()> {
        verlet_step(system, state, dt, &self.solver, self.remove_com, None)
    }

    fn constraint_solver(&self) -> &ConstraintSolver {
        &self.solver
    }

    fn removes_com_motion(&self) -> bool {
        self.remove_com
    }

    fn name(&self) -> &'static str {
        "velocity Verlet"
    }
}

/// Langevin dynamics in the BAOAB splitting.
#[derive(Debug, Clone)]
pub struct LangevinIntegrator {
    temperature: Kelvin,
    friction: InversePicoseconds,
    solver: ConstraintSolver,
    remove_com: bool,
    rng: StdRng,
}

impl LangevinIntegrator {
    /// A `seed` makes the trajectory reproducible; without one the generator
    /// is seeded from the OS.
    pub fn new(
        temperature: Kelvin,
        friction: InversePicoseconds,
        solver: ConstraintSolver,
        remove_com: bool,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        LangevinIntegrator {
            temperature,
            friction,
            solver,
            remove_com,
            rng,
        }
    }

    pub fn temperature(&self) -> Kelvin {
        self.temperature
    }

    pub fn friction(&self) -> InversePicoseconds {
        self.friction
    }

    /// The generator driving the thermostat noise.
    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl Integrator for LangevinIntegrator {
    fn step(&mut self, system: &System, state: &mut State, dt: f64) -> Result<()> {
        let thermostat = Thermostat {
            rng: &mut self.rng,
            kt: self.temperature.thermal_energy(),
            friction: self.friction.0,
        };
        verlet_step(system, state, dt, &self.solver, self.remove_com, Some(thermostat))
    }

    fn constraint_solver(&self) -> &ConstraintSolver {
        &self.solver
    }

    fn removes_com_motion(&self) -> bool {
        self.remove_com
    }

    fn name(&self) -> &'static str {
        "Langevin"
    }
}
