//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] volley_core::CoreError),

    #[error("Store error: {0}")]
    Store(#[from] volley_store::StoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] volley_broker::BrokerError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] volley_ingest::IngestError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] volley_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
