//! Process supervision.
//!
//! Boots the components for the selected mode, owns the cancellation
//! signal, and shepherds shutdown: stop accepting work, let in-flight
//! dispatches finish within a bounded drain window, then exit.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use clap::ValueEnum;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use volley_broker::{BrokerClient, KiteClient, MockBroker, RateGate};
use volley_dispatch::Dispatcher;
use volley_ingest::{Ingester, SheetsCsvReader, SourceReader};
use volley_store::{MemoryOrderStore, OrderStore, RedisOrderStore};

/// How long in-flight dispatches get to finish after shutdown is signalled.
const DRAIN_WINDOW: std::time::Duration = std::time::Duration::from_secs(10);

/// Process mode, one loop per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Poll the source and fill the store.
    Ingester,
    /// Drain due orders against the broker.
    Dispatcher,
}

/// Lifecycle of the supervised loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Init,
    Running,
    Draining,
    Stopped,
}

/// Boots components and runs the selected loop until shutdown.
pub struct Supervisor {
    config: AppConfig,
}

impl Supervisor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run until ctrl-c. A clean shutdown returns `Ok`; fatal init errors
    /// propagate and the process exits non-zero.
    pub async fn run(self, mode: Mode) -> AppResult<()> {
        let mut state = LoopState::Init;
        info!(?mode, ?state, "Supervisor booting");

        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                signal_cancel.cancel();
            }
        });

        let store = self.build_store().await?;

        state = LoopState::Running;
        info!(?state, "Supervisor state change");

        match mode {
            Mode::Ingester => self.run_ingester(store, cancel.clone()).await?,
            Mode::Dispatcher => self.run_dispatcher(store, cancel.clone()).await?,
        }

        state = LoopState::Stopped;
        info!(?state, "Supervisor state change");
        Ok(())
    }

    async fn run_ingester(
        &self,
        store: Arc<dyn OrderStore>,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        let reader = self.build_reader()?;
        let clock = self.config.market_clock()?;
        let ingester = Ingester::new(
            reader,
            store,
            clock,
            self.config.grace(),
            self.config.refresh_interval(),
        );
        // The ingester is stateless between cycles; returning on
        // cancellation is the whole shutdown story.
        ingester.run(cancel).await;
        Ok(())
    }

    async fn run_dispatcher(
        &self,
        store: Arc<dyn OrderStore>,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        let broker = self.build_broker()?;
        let gate = Arc::new(RateGate::new(
            self.config.broker.rate.requests_per_second,
            self.config.broker.rate.burst,
        ));
        let dispatcher = Dispatcher::new(store, broker, gate, self.config.dispatcher_config());

        let loop_cancel = cancel.clone();
        let loop_dispatcher = Arc::clone(&dispatcher);
        let handle = tokio::spawn(async move {
            loop_dispatcher.run_continuous(loop_cancel).await;
        });

        cancel.cancelled().await;
        let state = LoopState::Draining;
        info!(?state, "Supervisor state change");

        // Give the current cycle its drain window, then cut it loose; any
        // abandoned order stays in the store for the next process, bounded
        // by its expiry and the lock TTL.
        match tokio::time::timeout(DRAIN_WINDOW, handle).await {
            Ok(Ok(())) => info!("Dispatcher drained cleanly"),
            Ok(Err(e)) => error!(error = %e, "Dispatcher task failed during drain"),
            Err(_) => warn!("Drain window elapsed with work in flight, exiting"),
        }
        Ok(())
    }

    async fn build_store(&self) -> AppResult<Arc<dyn OrderStore>> {
        // Mock runs with no address configured stay fully in-process.
        if self.config.broker.kind == "mock" && self.config.store.address.is_empty() {
            info!("Using in-memory order store");
            return Ok(Arc::new(MemoryOrderStore::new()));
        }
        info!(address = %self.config.store.address, "Connecting to order store");
        let store = RedisOrderStore::connect(
            &self.config.store.address,
            &self.config.store.password,
            self.config.store.database,
        )
        .await?;
        Ok(Arc::new(store))
    }

    fn build_broker(&self) -> AppResult<Arc<dyn BrokerClient>> {
        match self.config.broker.kind.as_str() {
            "mock" => {
                info!("Using mock broker");
                Ok(Arc::new(MockBroker::new()))
            }
            "kite" => {
                let client = KiteClient::new(
                    self.config.broker.api_key.clone(),
                    self.config.broker.access_token.clone(),
                    self.config.broker.base_url.clone(),
                )?;
                Ok(Arc::new(client))
            }
            other => Err(AppError::Config(format!(
                "unknown broker type: {other} (supported: mock, kite)"
            ))),
        }
    }

    fn build_reader(&self) -> AppResult<Arc<dyn SourceReader>> {
        if self.config.source.document_id.is_empty() {
            return Err(AppError::Config(
                "source.document_id is required in ingester mode".to_string(),
            ));
        }
        let credentials = if self.config.source.credentials_path.is_empty() {
            None
        } else {
            Some(self.config.source.credentials_path.as_str())
        };
        let reader = SheetsCsvReader::new(
            self.config.source.document_id.clone(),
            self.config.source.buy_range.clone(),
            self.config.source.sell_range.clone(),
            credentials,
        )?;
        Ok(Arc::new(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_broker(kind: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.broker.kind = kind.to_string();
        config.broker.api_key = "key".to_string();
        config.broker.access_token = "token".to_string();
        config
    }

    #[test]
    fn mock_broker_builds() {
        let supervisor = Supervisor::new(config_with_broker("mock"));
        assert!(supervisor.build_broker().is_ok());
    }

    #[test]
    fn kite_broker_requires_credentials() {
        let mut config = config_with_broker("kite");
        config.broker.access_token = String::new();
        let supervisor = Supervisor::new(config);
        assert!(supervisor.build_broker().is_err());
    }

    #[test]
    fn unknown_broker_rejected() {
        let supervisor = Supervisor::new(config_with_broker("etrade"));
        assert!(matches!(
            supervisor.build_broker(),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn ingester_requires_document_id() {
        let supervisor = Supervisor::new(AppConfig::default());
        assert!(matches!(supervisor.build_reader(), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn mock_mode_without_address_uses_memory_store() {
        let mut config = config_with_broker("mock");
        config.store.address = String::new();
        let supervisor = Supervisor::new(config);
        assert!(supervisor.build_store().await.is_ok());
    }
}
