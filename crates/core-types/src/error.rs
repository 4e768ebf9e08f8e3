// In crates/core-types/src/error.rs

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("Signal confidence must lie in [0, 1], got {0}")]
    InvalidConfidence(f64),

    #[error("Position quantity must be non-zero")]
    ZeroQuantity,

    #[error("A position is already open for {0}")]
    PositionAlreadyOpen(String),

    #[error("No open position for {0}")]
    NoOpenPosition(String),
}

pub type Result<T> = std::result::Result<T, Error>;
