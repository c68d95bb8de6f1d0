//! Broker-facing contract and adapters.
//!
//! The dispatcher talks to a `BrokerClient` through this crate: the Kite
//! Connect adapter is the primary target, the mock adapter backs tests and
//! `broker.type = "mock"` runs. Every outbound call is expected to pass
//! through the shared `RateGate` first.

use async_trait::async_trait;
use volley_core::Order;

pub mod error;
pub mod kite;
pub mod mock;
pub mod rate_gate;

pub use error::{classify_http, classify_transport, BrokerError, BrokerResult};
pub use kite::KiteClient;
pub use mock::{MockBroker, PlacementChannel, RecordedPlacement};
pub use rate_gate::{GateCancelled, RateGate};

/// Broker acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Broker-assigned order reference.
    pub broker_ref: String,
}

/// Result of a symbol probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolStatus {
    Known,
    Unknown,
}

/// Contract every broker adapter satisfies.
///
/// Routing is the caller's job: orders stamped `is_amo` go to `place_amo`,
/// the rest to `place_regular`. A failed regular placement never mutates
/// the order's AMO stamp.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Place one order on the regular channel.
    async fn place_regular(&self, order: &Order) -> BrokerResult<Placement>;

    /// Place one order on the after-market channel.
    async fn place_amo(&self, order: &Order) -> BrokerResult<Placement>;

    /// Probe broker reachability and credential validity.
    async fn health(&self) -> BrokerResult<()>;

    /// Check whether the broker knows a symbol. Adapters may report `Known`
    /// on permission-denied so a restricted probe never blocks dispatch.
    async fn validate_symbol(&self, exchange: &str, symbol: &str) -> BrokerResult<SymbolStatus>;
}
