// In crates/strategies/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid strategy parameters: {0}")]
    InvalidParameters(String),

    #[error("Failed to parse strategy parameters: {0}")]
    ParamsError(#[from] toml::de::Error),

    #[error("Indicator error: {0}")]
    IndicatorError(String),

    #[error("Price {0} cannot be represented as f64")]
    UnrepresentablePrice(rust_decimal::Decimal),

    #[error("Strategy produced an invalid signal: {0}")]
    InvalidSignal(#[from] core_types::Error),

    #[error("Strategy failed: {0}")]
    ExecutionFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
