//! End-to-end runs of the minimize → equilibrate → produce protocol.

mod common;

use common::{butane, config, methane, split_tables};
use md_engine::analysis::distance;
use md_engine::constraints::max_violation;
use md_engine::{
    run_protocol, CancelToken, ConstraintSolver, CoordinateReporter, Femtoseconds, Frame, Integrator, Kelvin, MdError,
    MinimizerSettings, Phase, Reporter, ReporterSet, Simulation, SimulationConfig, Stage, State, System, SystemBuilder,
    Termination, TrajectoryReader, VelocityVerlet,
};
use nalgebra::Vector3;
use periodic_table_on_an_enum::Element;
use std::cell::Cell;
use std::io::{self, Write};
use std::rc::Rc;
use tempfile::tempdir;

#[test]
fn test_lj_pair_relaxes_to_potential_minimum() {
    let mut builder = SystemBuilder::new();
    builder.add_atom(Element::Argon, 39.948, 0.0, 0.34, 1.0);
    builder.add_atom(Element::Argon, 39.948, 0.0, 0.34, 1.0);
    let system = builder.build().unwrap();
    let positions = vec![Vector3::zeros(), Vector3::new(0.5, 0.0, 0.0)];

    let dir = tempdir().unwrap();
    let mut cfg = config(&dir.path().join("unused.dcd"));
    cfg.minimization = MinimizerSettings {
        force_tolerance: 0.01,
        energy_tolerance: 1e-12,
        ..MinimizerSettings::default()
    };
    let mut sim = Simulation::langevin(&system, positions, cfg).unwrap();
    let report = sim.minimize().unwrap();

    let r = distance(&sim.state().positions[0], &sim.state().positions[1]);
    let r_min = 2f64.powf(1.0 / 6.0) * 0.34;
    assert!((r - r_min).abs() < 1e-3, "relaxed to {} instead of {}", r, r_min);
    assert!(report.final_energy < report.initial_energy);
    assert!((report.final_energy + 1.0).abs() < 1e-3);
    assert_ne!(report.termination, Termination::MaxIterations);
    assert_eq!(sim.phase(), Phase::Minimized);
}

#[test]
fn test_equilibration_reports_every_interval() {
    let (system, positions) = butane();
    let dir = tempdir().unwrap();
    let mut cfg = config(&dir.path().join("butane.dcd"));
    cfg.equilibration.steps = 2500;
    cfg.equilibration.report_interval = 100;

    let mut console = Vec::new();
    let summary = run_protocol(&system, positions, &cfg, &mut console).unwrap();
    let (equilibration, production) = split_tables(&console);

    assert_eq!(equilibration.len(), 25);
    for (n, line) in equilibration.iter().enumerate() {
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].parse::<u64>().unwrap(), 100 * (n as u64 + 1));
        let energy: f64 = fields[1].parse().unwrap();
        let temperature: f64 = fields[2].parse().unwrap();
        assert!(energy.is_finite());
        assert!(temperature.is_finite() && temperature > 0.0);
    }

    // Production steps continue from where equilibration stopped.
    assert_eq!(production.len(), 2);
    assert!(production[0].starts_with("2600,"));
    assert_eq!(production[0].split(',').count(), 5);
    assert_eq!(summary.equilibration.last_step, 2500);
    assert_eq!(summary.production.as_ref().unwrap().last_step, 2700);
    assert_eq!(summary.final_phase, Phase::Closed);
    assert!(!summary.cancelled());
}

#[test]
fn test_production_writes_one_frame_per_interval() {
    let (system, positions) = butane();
    let dir = tempdir().unwrap();
    let path = dir.path().join("production.dcd");
    let mut cfg = config(&path);
    cfg.production.steps = 10_000;
    cfg.production.report_interval = 1000;
    cfg.production.trajectory_interval = 100;

    let summary = run_protocol(&system, positions, &cfg, &mut io::sink()).unwrap();
    assert_eq!(summary.trajectory_frames, 100);

    let reader = TrajectoryReader::open(&path).unwrap();
    assert_eq!(reader.header().frames, 100);
    assert_eq!(reader.header().first_step, 200);
    assert_eq!(reader.header().interval, 100);
    let frames: Vec<_> = reader.collect::<Result<_, _>>().unwrap();
    assert_eq!(frames.len(), 100);
    for (n, frame) in frames.iter().enumerate() {
        assert_eq!(frame.step, 100 + 100 * (n as u64 + 1));
        assert_eq!(frame.positions.len(), 4);
    }
}

#[test]
#[ignore] // ten million steps, run explicitly
fn test_long_production_run() {
    let (system, positions) = butane();
    let dir = tempdir().unwrap();
    let path = dir.path().join("long.dcd");
    let mut cfg = config(&path);
    cfg.timestep = Femtoseconds(2.0);
    cfg.production.steps = 10_000_000;
    cfg.production.report_interval = 100_000;
    cfg.production.trajectory_interval = 1000;

    let summary = run_protocol(&system, positions, &cfg, &mut io::sink()).unwrap();
    assert_eq!(summary.trajectory_frames, 10_000);
    assert_eq!(TrajectoryReader::open(&path).unwrap().header().frames, 10_000);
}

#[test]
fn test_zero_timestep_is_rejected_before_any_output() {
    let (system, positions) = butane();
    let dir = tempdir().unwrap();
    let path = dir.path().join("never.dcd");
    let mut cfg = config(&path);
    cfg.timestep = Femtoseconds(0.0);

    let mut console = Vec::new();
    let err = run_protocol(&system, positions, &cfg, &mut console).unwrap_err();
    assert_eq!(err.stage, Stage::Setup);
    assert!(matches!(err.source, MdError::Configuration(_)));
    assert_eq!(err.kind(), "ConfigurationError");
    assert!(console.is_empty());
    assert!(!path.exists());
}

#[test]
fn test_constraints_hold_in_every_frame() {
    let (system, positions) = methane();
    assert_eq!(system.constraints().len(), 4);
    let dir = tempdir().unwrap();
    let path = dir.path().join("methane.dcd");
    let mut cfg = config(&path);
    cfg.production.steps = 1000;
    cfg.production.trajectory_interval = 10;

    let summary = run_protocol(&system, positions, &cfg, &mut io::sink()).unwrap();
    assert!(max_violation(system.constraints(), &summary.final_state.positions) < 1e-5);

    let mut frames = 0;
    for frame in TrajectoryReader::open(&path).unwrap() {
        let frame = frame.unwrap();
        for c in system.constraints() {
            let r = distance(&frame.positions[c.i], &frame.positions[c.j]);
            // Single precision storage limits the check.
            assert!((r - c.distance).abs() / c.distance < 1e-4, "step {}: {} vs {}", frame.step, r, c.distance);
        }
        frames += 1;
    }
    assert_eq!(frames, 100);
}

/// Cancels the run once it has seen `at` steps of the phase.
struct CancelAt {
    token: CancelToken,
    at: u64,
    seen: u64,
}

impl Reporter for CancelAt {
    fn name(&self) -> &str {
        "cancel"
    }

    fn interval(&self) -> u64 {
        10
    }

    fn report(&mut self, _frame: &Frame<'_>) -> md_engine::Result<()> {
        self.seen += 10;
        if self.seen >= self.at {
            self.token.cancel();
        }
        Ok(())
    }
}

#[test]
fn test_cancellation_keeps_a_readable_trajectory() {
    let (system, positions) = butane();
    let dir = tempdir().unwrap();
    let path = dir.path().join("cancelled.dcd");
    let cfg = config(&path);

    let mut sim = Simulation::langevin(&system, positions, cfg.clone()).unwrap();
    sim.minimize().unwrap();
    sim.equilibrate(ReporterSet::new(false)).unwrap();

    let mut coordinates = CoordinateReporter::create(&path, system.n_atoms(), 10, cfg.dt()).unwrap();
    let reporters = ReporterSet::new(false).with(&mut coordinates).with(CancelAt {
        token: sim.cancel_token(),
        at: 50,
        seen: 0,
    });
    let summary = sim.produce(reporters).unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.steps, 50);
    assert_eq!(sim.phase(), Phase::Equilibrated);
    assert_eq!(coordinates.frames_written(), 5);

    let reader = TrajectoryReader::open(&path).unwrap();
    assert_eq!(reader.header().frames, 5);
    assert_eq!(reader.count(), 5);
    assert_eq!(sim.close(), Phase::Closed);
}

/// Console that refuses every write.
struct ClosedConsole;

impl Write for ClosedConsole {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "console closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_failing_console_is_dropped_unless_strict() {
    let (system, positions) = butane();
    let dir = tempdir().unwrap();
    let path = dir.path().join("lenient.dcd");
    let cfg = config(&path);

    let summary = run_protocol(&system, positions.clone(), &cfg, &mut ClosedConsole).unwrap();
    assert_eq!(summary.trajectory_frames, 10);

    let mut strict = config(&dir.path().join("strict.dcd"));
    strict.strict_reporters = true;
    let err = run_protocol(&system, positions, &strict, &mut ClosedConsole).unwrap_err();
    assert_eq!(err.stage, Stage::Equilibration);
    assert_eq!(err.kind(), "IOError");
    assert_eq!(err.last_step, 50);
    assert_eq!(err.last_frame.as_ref().map(|f| f.step), Some(50));
}

#[test]
fn test_phase_order_through_public_api() {
    let (system, positions) = butane();
    let dir = tempdir().unwrap();
    let mut sim = Simulation::langevin(&system, positions, config(&dir.path().join("x.dcd"))).unwrap();
    let err = sim.produce(ReporterSet::new(false)).unwrap_err();
    assert_eq!(err.to_string(), "production failed after step 0 (PhaseOrderError): cannot produce while the simulation is idle");
    assert_eq!(sim.phase(), Phase::Idle);
}

/// Velocity Verlet whose constraint solver gives up on selected full-length
/// steps, and on every shorter step when `shorter_steps_fail` is set.
struct FlakyConstraints {
    inner: VelocityVerlet,
    full_dt: f64,
    full_steps: u64,
    fails_at: fn(u64) -> bool,
    shorter_steps_fail: bool,
    shorter_steps: Rc<Cell<u64>>,
}

impl FlakyConstraints {
    fn new(cfg: &SimulationConfig, fails_at: fn(u64) -> bool, shorter_steps_fail: bool) -> Self {
        FlakyConstraints {
            inner: VelocityVerlet::new(cfg.constraint_solver(), true),
            full_dt: cfg.dt(),
            full_steps: 0,
            fails_at,
            shorter_steps_fail,
            shorter_steps: Rc::new(Cell::new(0)),
        }
    }
}

impl Integrator for FlakyConstraints {
    fn step(&mut self, system: &System, state: &mut State, dt: f64) -> md_engine::Result<()> {
        let fails = if dt < self.full_dt {
            self.shorter_steps.set(self.shorter_steps.get() + 1);
            self.shorter_steps_fail
        } else {
            self.full_steps += 1;
            (self.fails_at)(self.full_steps)
        };
        if fails {
            return Err(MdError::ConstraintConvergence {
                iterations: 3,
                max_violation: 1e-2,
            });
        }
        self.inner.step(system, state, dt)
    }

    fn constraint_solver(&self) -> &ConstraintSolver {
        self.inner.constraint_solver()
    }

    fn removes_com_motion(&self) -> bool {
        self.inner.removes_com_motion()
    }

    fn name(&self) -> &'static str {
        "flaky verlet"
    }
}

#[test]
fn test_unconverged_step_is_retried_with_half_steps() {
    let (system, positions) = methane();
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("retry.dcd"));
    let integrator = FlakyConstraints::new(&cfg, |n| n % 7 == 0, false);
    let shorter_steps = Rc::clone(&integrator.shorter_steps);

    let mut sim = Simulation::new(&system, positions, cfg, integrator).unwrap();
    sim.minimize().unwrap();
    let summary = sim.equilibrate(ReporterSet::new(false)).unwrap();

    assert_eq!(summary.steps, 100);
    assert_eq!(summary.last_step, 100);
    assert_eq!(sim.phase(), Phase::Equilibrated);
    // Steps 7, 14, ..., 98 each ran as two halves.
    assert_eq!(shorter_steps.get(), 2 * 14);
    assert!((sim.state().time - 0.1).abs() < 1e-12);
    assert!(max_violation(system.constraints(), &sim.state().positions) < 1e-5);
}

#[test]
fn test_failed_retry_aborts_with_last_valid_frame() {
    let (system, positions) = methane();
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("abort.dcd"));
    let integrator = FlakyConstraints::new(&cfg, |n| n > 30, true);

    let mut sim = Simulation::new(&system, positions, cfg, integrator).unwrap();
    sim.minimize().unwrap();
    let err = sim.equilibrate(ReporterSet::new(false)).unwrap_err();

    assert_eq!(err.kind(), "ConstraintConvergenceError");
    assert_eq!(err.stage, Stage::Equilibration);
    assert_eq!(err.last_step, 30);
    let frame = err.last_frame.as_ref().unwrap();
    assert_eq!(frame.step, 30);
    assert_eq!(frame.positions, sim.state().positions);
    assert!(max_violation(system.constraints(), &frame.positions) < 1e-5);
    assert_eq!(sim.state().step, 30);
    assert_eq!(sim.phase(), Phase::Minimized);
}

#[test]
fn test_blow_up_aborts_with_numerical_instability() {
    let mut builder = SystemBuilder::new();
    builder.add_atom(Element::Carbon, 12.0, 0.0, 0.34, 0.4);
    builder.add_atom(Element::Oxygen, 16.0, 0.0, 0.30, 0.6);
    builder.add_bond(0, 1, 0.123, 4.0e5);
    let system = builder.build().unwrap();
    let positions = vec![Vector3::zeros(), Vector3::new(0.13, 0.0, 0.0)];

    let dir = tempdir().unwrap();
    let mut cfg = config(&dir.path().join("unstable.dcd"));
    cfg.temperature = Kelvin(3000.0);
    cfg.timestep = Femtoseconds(200.0);
    cfg.equilibration.steps = 1000;

    let mut console = Vec::new();
    let err = run_protocol(&system, positions, &cfg, &mut console).unwrap_err();
    assert_eq!(err.kind(), "NumericalInstabilityError");
    assert_eq!(err.stage, Stage::Equilibration);
    assert!(err.last_step < 1000);
    let frame = err.last_frame.as_ref().unwrap();
    assert_eq!(frame.step, err.last_step);
    assert!(frame.positions.iter().all(|p| p.iter().all(|c| c.is_finite())));
    assert!(!dir.path().join("unstable.dcd").exists());
}
