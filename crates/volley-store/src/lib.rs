//! Shared, time-indexed store of pending orders.
//!
//! The store is the only state shared between the ingester and however many
//! dispatcher processes are running; every mutation is per-key atomic so
//! the cross-process semantics hold without transactions. Two
//! implementations are provided: `RedisOrderStore` for production and
//! `MemoryOrderStore` for mock mode and tests. Both satisfy the same
//! contract:
//!
//! - `insert` is idempotent on the order id and never duplicates the
//!   due-index entry
//! - `due` returns eligible orders in non-decreasing scheduled order,
//!   evicting expired and dangling entries in passing
//! - `try_lock` is an atomic set-if-absent with TTL, establishing a single
//!   dispatcher's exclusivity for one attempt

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use volley_core::{Order, OrderId};

pub mod error;
pub mod memory;
pub mod redis_store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryOrderStore;
pub use redis_store::RedisOrderStore;

/// Contract for the pending-order store.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Store an order until `expires_at`, replacing any record with the
    /// same id. Fails with `StoreError::Expired` when the expiry is not in
    /// the future.
    async fn insert(&self, order: Order, expires_at: DateTime<Utc>) -> StoreResult<()>;

    /// Orders whose scheduled instant has passed but whose expiry has not,
    /// sorted by scheduled instant (ties by insertion). Expired records and
    /// index entries pointing at missing records are evicted on encounter.
    async fn due(&self, now: DateTime<Utc>) -> StoreResult<Vec<Order>>;

    /// Whether a live record exists for `id`. Dispatchers revalidate with
    /// this after acquiring the execution lock: a stale due list must not
    /// resurrect an order another process already completed and removed.
    async fn contains(&self, id: &OrderId) -> StoreResult<bool>;

    /// Drop the record and its due-index entry. Idempotent.
    async fn remove(&self, id: &OrderId) -> StoreResult<()>;

    /// Atomically acquire the per-order execution lock for `ttl`. A `true`
    /// result makes the caller the sole dispatcher for this id until the
    /// lock is released or the TTL lapses.
    async fn try_lock(&self, id: &OrderId, ttl: Duration) -> StoreResult<bool>;

    /// Best-effort release of the execution lock.
    async fn unlock(&self, id: &OrderId) -> StoreResult<()>;

    /// Probe backend reachability.
    async fn health(&self) -> StoreResult<()>;
}
