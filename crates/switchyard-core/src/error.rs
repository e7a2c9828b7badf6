use core::result::Result as CoreResult;
use std::io::Error as IoError;

use serde_json::Error as SerdeJsonError;
use thiserror::Error as ThisError;
use toml::de::Error as TomlError;

/// Result type for core operations.
pub type Result<T> = CoreResult<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, ThisError)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A backend adapter encountered an error.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A backend call exceeded its deadline.
    #[error("Backend timed out after {0}ms")]
    BackendTimeout(u64),

    /// Required API key was not found.
    #[error("API key not found: {0}")]
    MissingApiKey(String),

    /// A backend returned a response that could not be interpreted.
    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    /// The specified file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// A general error not covered by other variants.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Determines whether this error may succeed if retried against another
    /// backend.
    ///
    /// Returns `true` for transient failures like network errors, backend
    /// errors, and timeouts.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend(_) | Self::BackendTimeout(_) | Self::InvalidResponse(_)
        )
    }
}
