//! Error types for Gatewarden.
//!
//! Admission rejections are not errors; they are returned as
//! [`Decision::Rejected`](crate::ratelimit::Decision). Only configuration and
//! environment problems surface here.

use thiserror::Error;

/// Main error type for Gatewarden operations.
#[derive(Error, Debug)]
pub enum GatewardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limiter definition failed validation when its policy was loaded
    #[error("Invalid rate limiter '{counter}': {reason}")]
    InvalidLimiter { counter: String, reason: String },

    /// Errors raised while layering settings sources
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// A load driver worker panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewardenError {
    pub(crate) fn invalid_limiter(counter: &str, reason: impl Into<String>) -> Self {
        GatewardenError::InvalidLimiter {
            counter: counter.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Gatewarden operations.
pub type Result<T> = std::result::Result<T, GatewardenError>;
