//! Logging setup and console output for MD jobs

mod output;

pub use output::{setup_output, write_final_positions};
