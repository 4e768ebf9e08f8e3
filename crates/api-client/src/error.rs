// In crates/api-client/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(#[from] serde_json::Error),
    #[error("API error: code {code}, msg: {msg}")]
    ApiError { code: i64, msg: String },
    #[error("Malformed {field} value {value:?} in kline opening at {open_time}")]
    MalformedKline {
        field: &'static str,
        value: String,
        open_time: i64,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
