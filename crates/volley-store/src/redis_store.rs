//! Redis-backed order store.
//!
//! Key layout, shared with operators' tooling:
//! - `order:{id}`: JSON `OrderRecord`, TTL = time to expiry
//! - `pending_orders`: sorted set, score = scheduled epoch seconds,
//!   member = order id
//! - `lock:order:{id}`: execution lock via `SET NX PX`

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};
use volley_core::{Order, OrderId, OrderRecord};

use crate::error::{StoreError, StoreResult};
use crate::OrderStore;

const PENDING_INDEX: &str = "pending_orders";

/// Deadline applied to every backend round trip.
const OP_TIMEOUT: StdDuration = StdDuration::from_secs(5);

fn record_key(id: &OrderId) -> String {
    format!("order:{id}")
}

fn lock_key(id: &OrderId) -> String {
    format!("lock:order:{id}")
}

/// Order store on a shared Redis backend.
///
/// The connection manager reconnects on its own; every operation carries a
/// short deadline so a wedged backend surfaces as `StoreError::Timeout`
/// instead of stalling a dispatch cycle.
#[derive(Clone)]
pub struct RedisOrderStore {
    conn: ConnectionManager,
}

impl RedisOrderStore {
    /// Connect to `host:port` with optional password, selecting `database`.
    pub async fn connect(address: &str, password: &str, database: i64) -> StoreResult<Self> {
        let url = if password.is_empty() {
            format!("redis://{address}/{database}")
        } else {
            format!("redis://:{password}@{address}/{database}")
        };
        let client =
            Client::open(url).map_err(|e| StoreError::Backend(format!("invalid address: {e}")))?;
        let conn = tokio::time::timeout(OP_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|e| StoreError::Backend(format!("connect failed: {e}")))?;
        Ok(Self { conn })
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> StoreResult<T> {
        let mut conn = self.conn.clone();
        tokio::time::timeout(OP_TIMEOUT, cmd.query_async::<T>(&mut conn))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Fetch and decode one record, healing the index when the record is
    /// gone or unreadable. Returns `None` when the entry should be skipped.
    async fn load_record(&self, id_raw: &str) -> StoreResult<Option<OrderRecord>> {
        let id = OrderId::from(id_raw.to_string());
        let payload: Option<String> = self
            .run(redis::cmd("GET").arg(record_key(&id)))
            .await?;

        let Some(payload) = payload else {
            // Record expired out from under the index; the entry is a
            // self-healing signal.
            debug!(order_id = id_raw, "Dangling due-index entry, removing");
            let _: i64 = self
                .run(redis::cmd("ZREM").arg(PENDING_INDEX).arg(id_raw))
                .await?;
            return Ok(None);
        };

        match serde_json::from_str::<OrderRecord>(&payload) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(order_id = id_raw, error = %e, "Unreadable order record, evicting");
                self.remove(&id).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl OrderStore for RedisOrderStore {
    async fn insert(&self, order: Order, expires_at: DateTime<Utc>) -> StoreResult<()> {
        let now = Utc::now();
        let ttl_ms = (expires_at - now).num_milliseconds();
        if ttl_ms <= 0 {
            return Err(StoreError::Expired);
        }

        let record = OrderRecord {
            expires_at,
            inserted_at: now,
            order,
        };
        let payload = serde_json::to_string(&record)?;

        let _: () = self
            .run(
                redis::cmd("SET")
                    .arg(record_key(&record.order.id))
                    .arg(payload)
                    .arg("PX")
                    .arg(ttl_ms),
            )
            .await?;

        // ZADD on an existing member only re-scores it, so a re-ingested
        // row never duplicates its index entry.
        let _: i64 = self
            .run(
                redis::cmd("ZADD")
                    .arg(PENDING_INDEX)
                    .arg(record.order.scheduled_at.timestamp())
                    .arg(record.order.id.as_str()),
            )
            .await?;

        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        let ids: Vec<String> = self
            .run(
                redis::cmd("ZRANGEBYSCORE")
                    .arg(PENDING_INDEX)
                    .arg(0)
                    .arg(now.timestamp()),
            )
            .await?;

        let mut records = Vec::with_capacity(ids.len());
        for id_raw in &ids {
            let Some(record) = self.load_record(id_raw).await? else {
                continue;
            };
            if record.expires_at <= now {
                debug!(order_id = id_raw, "Order past expiry, evicting");
                self.remove(&record.order.id).await?;
                continue;
            }
            records.push(record);
        }

        // Index score is whole seconds; restore sub-second order and break
        // ties by insertion.
        records.sort_by_key(|r| (r.order.scheduled_at, r.inserted_at));
        Ok(records.into_iter().map(|r| r.order).collect())
    }

    async fn contains(&self, id: &OrderId) -> StoreResult<bool> {
        let n: i64 = self.run(redis::cmd("EXISTS").arg(record_key(id))).await?;
        Ok(n > 0)
    }

    async fn remove(&self, id: &OrderId) -> StoreResult<()> {
        let _: i64 = self.run(redis::cmd("DEL").arg(record_key(id))).await?;
        let _: i64 = self
            .run(redis::cmd("ZREM").arg(PENDING_INDEX).arg(id.as_str()))
            .await?;
        Ok(())
    }

    async fn try_lock(&self, id: &OrderId, ttl: Duration) -> StoreResult<bool> {
        let reply: Option<String> = self
            .run(
                redis::cmd("SET")
                    .arg(lock_key(id))
                    .arg("1")
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.num_milliseconds().max(1)),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, id: &OrderId) -> StoreResult<()> {
        let _: i64 = self.run(redis::cmd("DEL").arg(lock_key(id))).await?;
        Ok(())
    }

    async fn health(&self) -> StoreResult<()> {
        let reply: String = self.run(&redis::cmd("PING")).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("unexpected PING reply: {reply}")))
        }
    }
}
