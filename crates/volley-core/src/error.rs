//! Error types for volley-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid market timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid market hours: {0}")]
    InvalidMarketHours(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
