//! Error types shared across the runtime crates.

use thiserror::Error;

/// Result type for persistence operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a persistence backend.
///
/// Components built on the stores treat every variant as non-fatal: they log
/// the failure and continue with a degraded result.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Record does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A record with the same unique key already exists
    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// Record could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Backend-specific failure (SQLite, connection loss, ...)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Schema migration failed
    #[error("Migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn duplicate(entity: &'static str, id: impl ToString) -> Self {
        StoreError::Duplicate {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<chrono::ParseError> for StoreError {
    fn from(err: chrono::ParseError) -> Self {
        StoreError::Serialization(format!("invalid timestamp: {err}"))
    }
}

/// Failure of an external collaborator: the error classifier, the pattern
/// learner or a notification channel.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },

    #[error("{service} returned an invalid response: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },

    #[error("{service} timed out after {elapsed:?}")]
    Timeout {
        service: &'static str,
        elapsed: std::time::Duration,
    },
}

/// Error type for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
