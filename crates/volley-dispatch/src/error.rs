//! Dispatcher error types.

use thiserror::Error;
use volley_store::StoreError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
