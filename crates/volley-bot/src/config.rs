//! Application configuration.
//!
//! TOML file with defaults for every field; `VOLLEY_*` environment
//! variables override file values (env > file > default).

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use volley_core::{parse_market_time, parse_offset, MarketClock};
use volley_dispatch::DispatcherConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub order: OrderConfig,
}

/// Backing store endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub address: String,
    pub password: String,
    pub database: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            password: String::new(),
            database: 0,
        }
    }
}

/// Broker selection and credentials. The access token is the rotatable
/// field; rotation is handled outside this process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Adapter: `mock` or `kite`.
    #[serde(rename = "type")]
    pub kind: String,
    pub api_key: String,
    pub access_token: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub rate: RateConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: "mock".to_string(),
            api_key: String::new(),
            access_token: String::new(),
            base_url: None,
            rate: RateConfig::default(),
        }
    }
}

/// Rate-gate parameters, budgeted against the broker ceiling per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 3,
            burst: 3,
        }
    }
}

/// Ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub credentials_path: String,
    pub document_id: String,
    pub buy_range: String,
    pub sell_range: String,
    pub refresh_interval_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            credentials_path: String::new(),
            document_id: String::new(),
            buy_range: "to_buy!B3:J".to_string(),
            sell_range: "to_sell!B3:J".to_string(),
            refresh_interval_secs: 60,
        }
    }
}

/// Dispatcher cadences and pool size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    pub worker_pool_size: usize,
    pub check_interval_ms: u64,
    pub health_interval_secs: u64,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            worker_pool_size: 5,
            check_interval_ms: 1000,
            health_interval_secs: 300,
        }
    }
}

/// Market-hours policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Fixed offset: `IST`, `UTC`, or `+HH:MM`.
    pub timezone: String,
    /// `HH:MM` in the market timezone.
    pub open: String,
    pub close: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            timezone: "IST".to_string(),
            open: "09:00".to_string(),
            close: "15:30".to_string(),
        }
    }
}

/// Order lifecycle bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    /// Seconds past the scheduled instant during which dispatch is still
    /// worthwhile.
    pub grace_seconds: u64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self { grace_seconds: 10 }
    }
}

fn override_string(field: &mut String, key: &str) {
    if let Ok(value) = std::env::var(key) {
        *field = value;
    }
}

fn override_parsed<T: std::str::FromStr>(field: &mut T, key: &str) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse() {
            *field = parsed;
        } else {
            tracing::warn!(key, value, "Ignoring unparseable environment override");
        }
    }
}

impl AppConfig {
    /// Load from `path` when given (or `VOLLEY_CONFIG`, or
    /// `config/default.toml`), falling back to defaults when the file does
    /// not exist, then apply environment overrides.
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        let config_path = path
            .map(str::to_string)
            .or_else(|| std::env::var("VOLLEY_CONFIG").ok())
            .unwrap_or_else(|| "config/default.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        toml::from_str(&content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Environment wins over file values.
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.store.address, "VOLLEY_STORE_ADDRESS");
        override_string(&mut self.store.password, "VOLLEY_STORE_PASSWORD");
        override_parsed(&mut self.store.database, "VOLLEY_STORE_DATABASE");

        override_string(&mut self.broker.kind, "VOLLEY_BROKER_TYPE");
        override_string(&mut self.broker.api_key, "VOLLEY_BROKER_API_KEY");
        override_string(&mut self.broker.access_token, "VOLLEY_BROKER_ACCESS_TOKEN");
        if let Ok(url) = std::env::var("VOLLEY_BROKER_BASE_URL") {
            self.broker.base_url = Some(url);
        }
        override_parsed(&mut self.broker.rate.requests_per_second, "VOLLEY_BROKER_RATE_RPS");
        override_parsed(&mut self.broker.rate.burst, "VOLLEY_BROKER_RATE_BURST");

        override_string(&mut self.source.credentials_path, "VOLLEY_SOURCE_CREDENTIALS_PATH");
        override_string(&mut self.source.document_id, "VOLLEY_SOURCE_DOCUMENT_ID");
        override_string(&mut self.source.buy_range, "VOLLEY_SOURCE_BUY_RANGE");
        override_string(&mut self.source.sell_range, "VOLLEY_SOURCE_SELL_RANGE");
        override_parsed(
            &mut self.source.refresh_interval_secs,
            "VOLLEY_SOURCE_REFRESH_INTERVAL_SECS",
        );

        override_parsed(&mut self.dispatcher.worker_pool_size, "VOLLEY_DISPATCHER_WORKERS");
        override_parsed(
            &mut self.dispatcher.check_interval_ms,
            "VOLLEY_DISPATCHER_CHECK_INTERVAL_MS",
        );
        override_parsed(
            &mut self.dispatcher.health_interval_secs,
            "VOLLEY_DISPATCHER_HEALTH_INTERVAL_SECS",
        );

        override_string(&mut self.market.timezone, "VOLLEY_MARKET_TIMEZONE");
        override_string(&mut self.market.open, "VOLLEY_MARKET_OPEN");
        override_string(&mut self.market.close, "VOLLEY_MARKET_CLOSE");

        override_parsed(&mut self.order.grace_seconds, "VOLLEY_ORDER_GRACE_SECONDS");
    }

    /// Market clock from the `[market]` section.
    pub fn market_clock(&self) -> AppResult<MarketClock> {
        let offset = parse_offset(&self.market.timezone)?;
        let open = parse_market_time(&self.market.open)?;
        let close = parse_market_time(&self.market.close)?;
        Ok(MarketClock::new(offset, open, close)?)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_pool_size: self.dispatcher.worker_pool_size.max(1),
            check_interval: std::time::Duration::from_millis(self.dispatcher.check_interval_ms.max(100)),
            health_interval: std::time::Duration::from_secs(self.dispatcher.health_interval_secs.max(1)),
            lock_ttl: chrono::Duration::seconds(30),
        }
    }

    pub fn grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.order.grace_seconds as i64)
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.source.refresh_interval_secs.max(1))
    }
}
