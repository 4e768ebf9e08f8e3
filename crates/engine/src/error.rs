// In crates/engine/src/error.rs

use thiserror::Error;

/// Errors that stop a pipeline run before any work starts.
///
/// Everything that goes wrong once workers are running degrades into the
/// run output instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Settings(#[from] app_config::Error),

    #[error(transparent)]
    Simulation(#[from] backtester::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
