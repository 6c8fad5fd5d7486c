//! Unified error handling for the greenhouse control core.
//!
//! Every component boundary returns a [`GreenhouseResult`] rather than
//! panicking. Only two call sites in the whole core are allowed to trigger a
//! process restart (heartbeat expiry, alert-client cleanup exhaustion), and
//! both route through [`crate::collaborators::ProcessControl`] rather than
//! panicking directly.

use thiserror::Error;

/// Main error type for greenhouse control-core operations.
#[derive(Debug, Error)]
pub enum GreenhouseError {
    /// I/O related errors (persistence file backing, network sockets).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key/value store (NVS) errors.
    #[error("Store error: {0}")]
    Store(String),

    /// Relay arbitration errors.
    #[error("Relay error: {0}")]
    Relay(String),

    /// Sensor read/evaluate errors.
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Alert client / remote dispatch errors.
    #[error("Alert error: {0}")]
    Alert(String),

    /// Heartbeat supervisor errors.
    #[error("Heartbeat error: {0}")]
    Heartbeat(String),

    /// Bounded lock acquisition timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Resource not found (unknown client id, unknown key, ...).
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument rejected at the edge (HTTP handler / setter).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic internal error (use sparingly).
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type GreenhouseResult<T> = Result<T, GreenhouseError>;

impl From<serde_json::Error> for GreenhouseError {
    fn from(err: serde_json::Error) -> Self {
        GreenhouseError::Store(format!("serialization error: {err}"))
    }
}

impl From<reqwest::Error> for GreenhouseError {
    fn from(err: reqwest::Error) -> Self {
        GreenhouseError::Alert(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for GreenhouseError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        GreenhouseError::Internal("lock poisoned".to_string())
    }
}

impl GreenhouseError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GreenhouseError::Config(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        GreenhouseError::Store(msg.into())
    }

    pub fn relay<S: Into<String>>(msg: S) -> Self {
        GreenhouseError::Relay(msg.into())
    }

    pub fn sensor<S: Into<String>>(msg: S) -> Self {
        GreenhouseError::Sensor(msg.into())
    }

    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        GreenhouseError::NotFound(resource.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        GreenhouseError::InvalidInput(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GreenhouseError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GreenhouseError::NotFound(_))
    }
}
