//! Error Module
//!
//! Defines the error taxonomy shared by the read and listing reconciliation paths.
//! `Skip` is not an error: "nothing to serve here" is a successful outcome
//! (see `data_provider::ReadOutcome`).

use hyper::StatusCode;
use std::fmt;
use thiserror::Error;

/// Error reported by a remote backend (HEAD / GET).
///
/// Carries the HTTP-like status code when the backend produced one, so callers can
/// tell "object does not exist remotely" apart from transport or server failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub status: Option<StatusCode>,
    pub message: String,
}

impl BackendError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Error without a status code (connect failure, timeout, body error)
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(StatusCode::NOT_FOUND)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({})", self.message, status.as_u16()),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for BackendError {}

/// Main error type for the cache consistency layer
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// No persisted metadata for the object at this path
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("failed to {op} {path}: {reason}")]
    LoadFailed {
        op: String,
        path: String,
        reason: String,
    },

    #[error("failed to {op} {path}: {reason}")]
    FetchFailed {
        op: String,
        path: String,
        reason: String,
    },

    #[error("Backend error: {0}")]
    Backend(BackendError),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    pub fn load_failed(op: &str, path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        CacheError::LoadFailed {
            op: op.to_string(),
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn fetch_failed(op: &str, path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        CacheError::FetchFailed {
            op: op.to_string(),
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for local "no metadata" and for remote 404s
    pub fn is_not_found(&self) -> bool {
        match self {
            CacheError::NotFound(_) => true,
            CacheError::Backend(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Status code of the underlying backend error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CacheError::Backend(e) => e.status,
            _ => None,
        }
    }
}

impl From<BackendError> for CacheError {
    fn from(err: BackendError) -> Self {
        CacheError::Backend(err)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CacheError {
    fn from(err: serde_yaml::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

/// Result type alias for the cache consistency layer
pub type Result<T> = std::result::Result<T, CacheError>;
