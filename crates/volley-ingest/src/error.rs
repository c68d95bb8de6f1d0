//! Ingestion error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Source fetch failed: {0}")]
    Source(String),

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Credential file error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;
