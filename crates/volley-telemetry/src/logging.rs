//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter applied when `RUST_LOG` is unset. Dispatch profiles ride on
/// ordinary `info!` events, so nothing extra is needed to capture them.
const DEFAULT_FILTER: &str = "info,volley=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn is_production() -> bool {
    std::env::var("RUST_ENV").is_ok_and(|v| v == "production")
}

/// Initialize logging: JSON lines in production, pretty output otherwise.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> TelemetryResult<()> {
    let registry = tracing_subscriber::registry().with(env_filter());

    if is_production() {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().pretty().with_target(true))
            .try_init()
    }
    .map_err(|e| TelemetryError::Init(e.to_string()))
}
