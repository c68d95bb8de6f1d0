//! volley: scheduled trade dispatcher.
//!
//! Two process modes share one binary: `ingester` fills the order store
//! from the spreadsheet source, `dispatcher` fires due orders at the
//! broker. Exit code 0 on clean shutdown, non-zero on fatal init failure.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use volley_bot::{AppConfig, Mode, Supervisor};

/// Scheduled trade dispatcher
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Process mode to run
    #[arg(value_enum)]
    mode: Mode,

    /// Configuration file path (can also be set via VOLLEY_CONFIG)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    volley_telemetry::init_logging()?;

    info!("Starting volley v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config.as_deref())?;
    info!(
        broker = %config.broker.kind,
        store = %config.store.address,
        "Configuration loaded"
    );

    Supervisor::new(config).run(args.mode).await?;
    Ok(())
}
