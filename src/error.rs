//! Error types for the quota gate.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for quota gate operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors during a metered check
    #[error("Rate limit store error: {0}")]
    Store(#[from] StoreError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for quota gate operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
