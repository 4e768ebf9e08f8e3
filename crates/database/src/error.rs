// In crates/database/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to connect to the database")]
    ConnectionError(#[from] sqlx::Error),
    #[error("Database migration failed: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("Database operation failed: {0}")]
    OperationFailed(sqlx::Error),
    #[error("Failed to encode rows for COPY: {0}")]
    CopyEncoding(#[from] csv::Error),
    #[error("Value {0} cannot be stored as NUMERIC")]
    InvalidNumber(String),
}

pub type Result<T> = std::result::Result<T, Error>;
