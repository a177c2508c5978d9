//! A small molecular dynamics engine: bonded and nonbonded force fields,
//! SHAKE/RATTLE constraints, Verlet and Langevin integration, energy
//! minimization, DCD trajectories and trajectory analysis.

pub mod analysis;
pub mod config;
pub mod constraints;
pub mod error;
pub mod forcefield;
pub mod integrator;
pub mod minimizer;
pub mod reporter;
pub mod simulation;
pub mod state;
pub mod topology;
pub mod trajectory;
pub mod units;

pub use analysis::{Histogram, Observable, TrajectoryAnalyzer};
pub use config::{EquilibrationConfig, ProductionConfig, SimulationConfig};
pub use constraints::ConstraintSolver;
pub use error::{MdError, Result};
pub use forcefield::{EnergyTerms, ForceEvaluation, ForceField, ForceProvider};
pub use integrator::{Integrator, LangevinIntegrator, VelocityVerlet};
pub use minimizer::{EnergyMinimizer, MinimizationReport, MinimizerAlgorithm, MinimizerSettings, Termination};
pub use reporter::{Frame, Reporter, ReporterSet, StatisticsLayout, StatisticsReporter};
pub use simulation::{
    run_protocol, run_protocol_with_cancel, CancelToken, Phase, PhaseSummary, ProtocolSummary, RunError, Simulation,
    Stage,
};
pub use state::State;
pub use topology::{NonbondedMethod, NonbondedSettings, System, SystemBuilder, Topology};
pub use trajectory::{CoordinateReporter, DcdHeader, DcdWriter, RecordedFrame, TrajectoryReader};
pub use units::{Femtoseconds, InversePicoseconds, Kelvin};
