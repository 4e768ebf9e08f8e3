// In crates/backtester/src/error.rs

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("Invalid simulation settings: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
