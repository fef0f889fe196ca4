//! Crate-wide error types.

use thiserror::Error;

pub type ProfResult<T> = Result<T, ProfError>;

#[derive(Debug, Error)]
pub enum ProfError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("record error: {0}")]
    Record(String),

    #[error("report error: {0}")]
    Report(String),
}
