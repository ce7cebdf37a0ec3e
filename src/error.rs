//! Error taxonomy for the ad decision engine.
//!
//! "No ad for this slot" is never an error: selection that finds no winner
//! simply produces no result.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or missing request fields. Raised before any side effect.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Durable store failure on a read or write path
    #[error("Storage error: {0}")]
    Storage(String),

    /// The caller's deadline passed before the operation completed
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    /// Warm snapshot file could not be written or read back
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        EngineError::NotFound { entity, id }
    }

    /// True for errors caused by the caller's input rather than the engine.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidRequest(_) | EngineError::NotFound { .. }
        )
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(format!("JSON column: {}", e))
    }
}

impl From<bincode::Error> for EngineError {
    fn from(e: bincode::Error) -> Self {
        EngineError::Snapshot(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Snapshot(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
