//! Error types for unitree_db

use thiserror::Error;

/// Result type alias for unitree_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in unitree_db operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry has been shut down")]
    ShutDown,
}

impl Error {
    /// True for errors raised by the node or metadata store rather than by
    /// the request itself.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Serialization(_)
                | Error::Json(_)
                | Error::Storage(_)
                | Error::Corruption(_)
                | Error::InvalidFile(_)
                | Error::VersionMismatch { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
