//! Error types for Notegraph.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed tag/category boolean expression.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Caller or configuration mistake, e.g. an unknown sorter key.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
