//! Error taxonomy shared by every component of the engine.
//!
//! Lower layers (force field, constraints, reporters) never swallow errors;
//! they return an [`MdError`] and the simulation driver decides between
//! retrying and aborting.

use crate::simulation::Phase;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MdError {
    /// Invalid or missing parameter, detected before any step runs.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Malformed system description (bad indices, masses, duplicate constraints).
    #[error("invalid topology: {0}")]
    Topology(String),

    /// Non-finite energy, force, position or velocity.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// The iterative constraint solver hit its iteration cap.
    #[error(
        "constraints did not converge after {iterations} iterations \
         (max relative violation {max_violation:.3e})"
    )]
    ConstraintConvergence { iterations: usize, max_violation: f64 },

    /// A reporter sink or trajectory file could not be read or written.
    #[error("I/O error on {sink}: {source}")]
    Io {
        sink: String,
        #[source]
        source: std::io::Error,
    },

    /// A trajectory file does not follow the expected record layout.
    #[error("invalid trajectory file: {0}")]
    TrajectoryFormat(String),

    /// A driver transition was requested out of order.
    #[error("cannot {action} while the simulation is {current}")]
    PhaseOrder {
        action: &'static str,
        current: Phase,
    },
}

impl MdError {
    pub fn io(sink: impl Into<String>, source: std::io::Error) -> Self {
        MdError::Io {
            sink: sink.into(),
            source,
        }
    }

    /// Short name of the error kind, used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            MdError::Configuration(_) => "ConfigurationError",
            MdError::Topology(_) => "TopologyError",
            MdError::NumericalInstability(_) => "NumericalInstabilityError",
            MdError::ConstraintConvergence { .. } => "ConstraintConvergenceError",
            MdError::Io { .. } => "IOError",
            MdError::TrajectoryFormat(_) => "TrajectoryFormatError",
            MdError::PhaseOrder { .. } => "PhaseOrderError",
        }
    }
}

pub type Result<T> = std::result::Result<T, MdError>;
