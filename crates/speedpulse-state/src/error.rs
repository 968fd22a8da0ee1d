//! Error types for speedpulse-state

use thiserror::Error;

/// Errors that can occur in the persistence and settings layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No stored result carries the requested identifier
    #[error("Result not found: {id}")]
    NotFound { id: String },

    /// Underlying file I/O failed
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Settings file parsed but holds values that cannot be used
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for StorageError {
    fn from(err: toml::de::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}
