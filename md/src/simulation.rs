//! The simulation driver: minimize → equilibrate → produce.
//!
//! [`Simulation`] owns the mutable [`State`] and walks an explicit phase
//! machine. Each phase receives its own [`ReporterSet`]; reporters are
//! finished when the phase ends, on success, cancellation or failure.

use crate::config::SimulationConfig;
use crate::error::{MdError, Result};
use crate::integrator::{Integrator, LangevinIntegrator};
use crate::minimizer::{EnergyMinimizer, MinimizationReport};
use crate::reporter::{Frame, ReporterSet, StatisticsLayout, StatisticsReporter};
use crate::state::{
    degrees_of_freedom, maxwell_boltzmann, remove_com_velocity, rescale_to_temperature, temperature, State,
};
use crate::topology::System;
use crate::trajectory::{CoordinateReporter, RecordedFrame};
use crate::units::ns_per_day;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Where the driver is in the protocol. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Idle,
    Minimized,
    Equilibrated,
    Produced,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Minimized => "minimized",
            Phase::Equilibrated => "equilibrated",
            Phase::Produced => "produced",
            Phase::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// The part of the run an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Setup,
    Minimization,
    Equilibration,
    Production,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Setup => "setup",
            Stage::Minimization => "minimization",
            Stage::Equilibration => "equilibration",
            Stage::Production => "production",
        };
        f.write_str(s)
    }
}

/// Cooperative stop signal, checked once per step boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A fatal error together with where the run stopped.
#[derive(Debug, Error)]
#[error("{stage} failed after step {last_step} ({kind}): {source}", kind = .source.kind())]
pub struct RunError {
    pub stage: Stage,
    /// Last step that completed successfully.
    pub last_step: u64,
    /// The last valid configuration, when one exists.
    pub last_frame: Option<RecordedFrame>,
    #[source]
    pub source: MdError,
}

impl RunError {
    pub fn setup(source: MdError) -> Self {
        RunError {
            stage: Stage::Setup,
            last_step: 0,
            last_frame: None,
            source,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }
}

/// Outcome of one dynamics phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSummary {
    pub stage: Stage,
    pub steps: u64,
    /// Cumulative step number when the phase ended.
    pub last_step: u64,
    pub cancelled: bool,
    pub wall_time: Duration,
    pub ns_per_day: Option<f64>,
    pub final_temperature: f64,
    pub final_potential_energy: f64,
}

pub struct Simulation<'s, I: Integrator> {
    system: &'s System,
    integrator: I,
    state: State,
    config: SimulationConfig,
    phase: Phase,
    dof: usize,
    rng: StdRng,
    cancel: CancelToken,
}

impl<'s> Simulation<'s, LangevinIntegrator> {
    /// Langevin dynamics at the configured temperature and friction.
    pub fn langevin(system: &'s System, positions: Vec<Vector3<f64>>, config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let integrator = LangevinIntegrator::new(
            config.temperature,
            config.friction,
            config.constraint_solver(),
            config.remove_com_motion,
            config.seed,
        );
        Simulation::new(system, positions, config, integrator)
    }
}

impl<'s, I: Integrator> Simulation<'s, I> {
    pub fn new(system: &'s System, positions: Vec<Vector3<f64>>, config: SimulationConfig, integrator: I) -> Result<Self> {
        config.validate()?;
        let state = State::new(system, positions)?;
        // Velocity draws use a stream separate from the thermostat noise.
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(0x9e37_79b9_7f4a_7c15)),
            None => StdRng::from_entropy(),
        };
        let dof = degrees_of_freedom(system, integrator.removes_com_motion());

        tracing::info!(
            "Simulation of {} atoms with {} integrator, {} degrees of freedom, dt = {}",
            system.n_atoms(),
            integrator.name(),
            dof,
            config.timestep
        );

        Ok(Simulation {
            system,
            integrator,
            state,
            config,
            phase: Phase::Idle,
            dof,
            rng,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    pub fn system(&self) -> &System {
        self.system
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn degrees_of_freedom(&self) -> usize {
        self.dof
    }

    pub fn temperature(&self) -> f64 {
        temperature(self.state.kinetic_energy(self.system.masses()), self.dof)
    }

    fn last_frame(&self) -> RecordedFrame {
        RecordedFrame {
            step: self.state.step,
            time: self.state.time,
            positions: self.state.positions.clone(),
        }
    }

    fn fail(&self, stage: Stage, source: MdError) -> RunError {
        tracing::error!("{} failed at step {}: {}", stage, self.state.step, source);
        RunError {
            stage,
            last_step: self.state.step,
            last_frame: Some(self.last_frame()),
            source,
        }
    }

    fn require(&self, expected: Phase, action: &'static str, stage: Stage) -> std::result::Result<(), RunError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(RunError {
                stage,
                last_step: self.state.step,
                last_frame: None,
                source: MdError::PhaseOrder {
                    action,
                    current: self.phase,
                },
            })
        }
    }

    /// Relax the starting structure. Only valid from `Idle`.
    pub fn minimize(&mut self) -> std::result::Result<MinimizationReport, RunError> {
        self.require(Phase::Idle, "minimize", Stage::Minimization)?;
        let minimizer = EnergyMinimizer::new(self.config.minimization, self.config.constraint_solver());
        let report = minimizer
            .minimize(self.system, &mut self.state)
            .map_err(|e| self.fail(Stage::Minimization, e))?;
        self.phase = Phase::Minimized;
        Ok(report)
    }

    /// Assign thermal velocities and run the equilibration steps. Only valid
    /// from `Minimized`.
    pub fn equilibrate(&mut self, mut reporters: ReporterSet<'_>) -> std::result::Result<PhaseSummary, RunError> {
        if let Err(e) = self.require(Phase::Minimized, "equilibrate", Stage::Equilibration) {
            finish_quietly(&mut reporters);
            return Err(e);
        }
        if let Err(e) = self.initialize_velocities() {
            finish_quietly(&mut reporters);
            return Err(self.fail(Stage::Equilibration, e));
        }
        let summary = self.run_phase(Stage::Equilibration, self.config.equilibration.steps, &mut reporters)?;
        if !summary.cancelled {
            self.phase = Phase::Equilibrated;
        }
        Ok(summary)
    }

    /// Production dynamics. Only valid from `Equilibrated`.
    pub fn produce(&mut self, mut reporters: ReporterSet<'_>) -> std::result::Result<PhaseSummary, RunError> {
        if let Err(e) = self.require(Phase::Equilibrated, "produce", Stage::Production) {
            finish_quietly(&mut reporters);
            return Err(e);
        }
        let summary = self.run_phase(Stage::Production, self.config.production.steps, &mut reporters)?;
        if !summary.cancelled {
            self.phase = Phase::Produced;
        }
        Ok(summary)
    }

    /// Close the simulation. Allowed from any phase; closing twice is a no-op.
    pub fn close(&mut self) -> Phase {
        if self.phase != Phase::Closed {
            tracing::info!("Closing simulation at step {} ({})", self.state.step, self.phase);
            self.phase = Phase::Closed;
        }
        self.phase
    }

    fn initialize_velocities(&mut self) -> Result<()> {
        let masses = self.system.masses();
        let target = self.config.temperature;
        let mut velocities = maxwell_boltzmann(masses, target, &mut self.rng);
        if self.integrator.removes_com_motion() {
            remove_com_velocity(&mut velocities, masses);
        }
        self.integrator.constraint_solver().apply_velocities(
            self.system.constraints(),
            self.system.inverse_masses(),
            &self.state.positions,
            &mut velocities,
        )?;
        rescale_to_temperature(&mut velocities, masses, self.dof, target);
        self.state.velocities = velocities;
        tracing::debug!("Initial velocities drawn at {}", target);
        Ok(())
    }

    /// One step with a single retry as two half steps when the constraint
    /// solver does not converge.
    fn advance(&mut self, dt: f64) -> Result<()> {
        match self.integrator.step(self.system, &mut self.state, dt) {
            Err(MdError::ConstraintConvergence {
                iterations,
                max_violation,
            }) => {
                tracing::warn!(
                    "Constraints did not converge at step {} ({} iterations, violation {:.3e}), retrying with dt/2",
                    self.state.step + 1,
                    iterations,
                    max_violation
                );
                let checkpoint = self.state.clone();
                let half = 0.5 * dt;
                let retried = self
                    .integrator
                    .step(self.system, &mut self.state, half)
                    .and_then(|()| self.integrator.step(self.system, &mut self.state, half));
                if retried.is_err() {
                    self.state = checkpoint;
                }
                retried
            }
            other => other,
        }
    }

    fn run_phase(
        &mut self,
        stage: Stage,
        steps: u64,
        reporters: &mut ReporterSet<'_>,
    ) -> std::result::Result<PhaseSummary, RunError> {
        tracing::info!("Starting {}: {} steps from step {}", stage, steps, self.state.step);
        let started = Instant::now();
        let outcome = self.step_loop(stage, steps, reporters, started);

        // Reporters are finished on every exit path.
        let finished = reporters.finish();
        let (completed, cancelled) = match outcome {
            Ok(done) => done,
            Err(e) => return Err(self.fail(stage, e)),
        };
        if let Err(e) = finished {
            return Err(self.fail(stage, e));
        }

        let wall_time = started.elapsed();
        let speed = ns_per_day(completed as f64 * self.config.dt(), wall_time.as_secs_f64());
        let summary = PhaseSummary {
            stage,
            steps: completed,
            last_step: self.state.step,
            cancelled,
            wall_time,
            ns_per_day: speed,
            final_temperature: self.temperature(),
            final_potential_energy: self.state.potential_energy,
        };
        if cancelled {
            tracing::warn!("{} cancelled after {} of {} steps", stage, completed, steps);
        } else {
            tracing::info!(
                "Finished {} at step {} in {:.2} s ({} ns/day)",
                stage,
                self.state.step,
                wall_time.as_secs_f64(),
                speed.map_or_else(|| "--".to_string(), |s| format!("{:.3}", s))
            );
        }
        Ok(summary)
    }

    fn step_loop(
        &mut self,
        stage: Stage,
        steps: u64,
        reporters: &mut ReporterSet<'_>,
        started: Instant,
    ) -> Result<(u64, bool)> {
        let dt = self.config.dt();
        for phase_step in 1..=steps {
            if self.cancel.is_cancelled() {
                return Ok((phase_step - 1, true));
            }
            self.advance(dt)?;
            self.state.step += 1;
            self.state.time += dt;

            if reporters.is_due(phase_step) {
                let kinetic_energy = self.state.kinetic_energy(self.system.masses());
                let speed = match stage {
                    Stage::Production => ns_per_day(phase_step as f64 * dt, started.elapsed().as_secs_f64()),
                    _ => None,
                };
                let frame = Frame {
                    step: self.state.step,
                    time: self.state.time,
                    positions: &self.state.positions,
                    potential_energy: self.state.potential_energy,
                    kinetic_energy,
                    temperature: temperature(kinetic_energy, self.dof),
                    speed,
                };
                reporters.report(phase_step, &frame)?;
            }
        }
        Ok((steps, false))
    }
}

fn finish_quietly(reporters: &mut ReporterSet<'_>) {
    if let Err(e) = reporters.finish() {
        tracing::warn!("Could not finish reporters: {}", e);
    }
}

/// Results of a full [`run_protocol`] call.
#[derive(Debug, Clone)]
pub struct ProtocolSummary {
    pub minimization: MinimizationReport,
    pub equilibration: PhaseSummary,
    /// `None` when equilibration was cancelled.
    pub production: Option<PhaseSummary>,
    pub trajectory_frames: u64,
    pub final_phase: Phase,
    pub final_state: State,
}

impl ProtocolSummary {
    pub fn cancelled(&self) -> bool {
        self.equilibration.cancelled || self.production.as_ref().is_some_and(|p| p.cancelled)
    }
}

/// Validate `config`, then minimize, equilibrate and produce with Langevin
/// dynamics. Statistics go to `console`; coordinates to the configured
/// trajectory file.
pub fn run_protocol<W: Write>(
    system: &System,
    positions: Vec<Vector3<f64>>,
    config: &SimulationConfig,
    console: &mut W,
) -> std::result::Result<ProtocolSummary, RunError> {
    run_protocol_with_cancel(system, positions, config, console, CancelToken::new())
}

pub fn run_protocol_with_cancel<W: Write>(
    system: &System,
    positions: Vec<Vector3<f64>>,
    config: &SimulationConfig,
    console: &mut W,
    cancel: CancelToken,
) -> std::result::Result<ProtocolSummary, RunError> {
    config.validate().map_err(RunError::setup)?;
    let mut simulation = Simulation::langevin(system, positions, config.clone())
        .map_err(RunError::setup)?
        .with_cancel_token(cancel);
    let strict = config.strict_reporters;

    let minimization = simulation.minimize()?;

    let equilibration = simulation.equilibrate(ReporterSet::new(strict).with(StatisticsReporter::new(
        &mut *console,
        config.equilibration.report_interval,
        StatisticsLayout::Equilibration,
    )))?;

    let mut trajectory_frames = 0;
    let production = if equilibration.cancelled {
        None
    } else {
        let production = &config.production;
        let mut coordinates = CoordinateReporter::create(
            &production.trajectory,
            system.n_atoms(),
            production.trajectory_interval,
            config.dt(),
        )
        .map_err(|e| RunError {
            stage: Stage::Production,
            last_step: simulation.state().step,
            last_frame: None,
            source: e,
        })?;
        let reporters = ReporterSet::new(strict)
            .with(StatisticsReporter::new(
                &mut *console,
                production.report_interval,
                StatisticsLayout::Production,
            ))
            .with(&mut coordinates);
        let summary = simulation.produce(reporters)?;
        trajectory_frames = coordinates.frames_written();
        Some(summary)
    };

    let final_phase = simulation.close();
    Ok(ProtocolSummary {
        minimization,
        equilibration,
        production,
        trajectory_frames,
        final_phase,
        final_state: simulation.into_state(),
    })
}
