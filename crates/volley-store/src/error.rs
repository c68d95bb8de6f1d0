//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Expiry instant is not in the future")]
    Expired,

    #[error("Record encoding error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Store operation timed out")]
    Timeout,
}

pub type StoreResult<T> = Result<T, StoreError>;
