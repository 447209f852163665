//! Error types for storage-core
//!
//! Mirrors the taxonomy the engine promises callers: validation and
//! not-found errors name the offending field, I/O and build errors
//! carry enough context to log, and nothing here is used for control
//! flow within the engine itself.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error on '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("index build error: {0}")]
    Build(String),

    #[error("JSON encoding error: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn state(reason: impl Into<String>) -> Self {
        Error::State(reason.into())
    }
}
