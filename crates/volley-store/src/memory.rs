//! In-memory order store.
//!
//! Backs mock mode and tests with the same contract as the Redis store,
//! including lock TTL semantics. Not a substitute for the shared backend in
//! production: state here dies with the process.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use volley_core::{Order, OrderId, OrderRecord};

use crate::error::{StoreError, StoreResult};
use crate::OrderStore;

#[derive(Default)]
struct Inner {
    records: HashMap<OrderId, (OrderRecord, u64)>,
    locks: HashMap<OrderId, DateTime<Utc>>,
    seq: u64,
}

/// Order store held in process memory.
#[derive(Default)]
pub struct MemoryOrderStore {
    inner: Mutex<Inner>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, for test assertions.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live (unexpired) lock exists for `id`.
    pub fn is_locked(&self, id: &OrderId) -> bool {
        let inner = self.inner.lock();
        inner
            .locks
            .get(id)
            .is_some_and(|expiry| *expiry > Utc::now())
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: Order, expires_at: DateTime<Utc>) -> StoreResult<()> {
        if expires_at <= Utc::now() {
            return Err(StoreError::Expired);
        }
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        let id = order.id.clone();
        let record = OrderRecord {
            expires_at,
            inserted_at: Utc::now(),
            order,
        };
        // Overwrite keeps exactly one entry per id.
        inner.records.insert(id, (record, seq));
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        let mut inner = self.inner.lock();
        inner
            .records
            .retain(|_, (record, _)| record.expires_at > now);

        let mut due: Vec<_> = inner
            .records
            .values()
            .filter(|(record, _)| record.order.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|(record, seq)| (record.order.scheduled_at, *seq));
        Ok(due.into_iter().map(|(record, _)| record.order).collect())
    }

    async fn contains(&self, id: &OrderId) -> StoreResult<bool> {
        let now = Utc::now();
        let inner = self.inner.lock();
        Ok(inner
            .records
            .get(id)
            .is_some_and(|(record, _)| record.expires_at > now))
    }

    async fn remove(&self, id: &OrderId) -> StoreResult<()> {
        self.inner.lock().records.remove(id);
        Ok(())
    }

    async fn try_lock(&self, id: &OrderId, ttl: Duration) -> StoreResult<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        match inner.locks.get(id) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                inner.locks.insert(id.clone(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, id: &OrderId) -> StoreResult<()> {
        self.inner.lock().locks.remove(id);
        Ok(())
    }

    async fn health(&self) -> StoreResult<()> {
        Ok(())
    }
}
