//! Error types for hmem-core.

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::MemoryTier;

/// Result type alias using hmem-core Error
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Memory system errors
#[derive(Error, Debug)]
pub enum MemoryError {
    // Backend errors
    #[error("{backend} unavailable: {message}")]
    StoreUnavailable { backend: String, message: String },

    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Worker pool error: {0}")]
    Worker(String),

    // Record errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Request errors
    #[error("{tier} memory is disabled for this agent")]
    ConfigDisabled { tier: MemoryTier },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Create a store-unavailable error for a backend
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Create an invalid request error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Transient failures are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::Timeout { .. })
    }

    /// Check if this error is a disabled-tier error
    pub fn is_config_disabled(&self) -> bool {
        matches!(self, Self::ConfigDisabled { .. })
    }

    /// Check if this error is an invalid request error
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
