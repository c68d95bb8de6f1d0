//! Periodic ingestion of source rows into the order store.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use volley_core::{MarketClock, OrderSide};
use volley_store::OrderStore;

use crate::parse::parse_row;
use crate::source::{RawRow, SourceReader};

/// Counters from one ingest cycle, for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub rows_seen: usize,
    pub orders_inserted: usize,
    pub rows_rejected: usize,
    pub insert_failures: usize,
}

/// Turns the external feed into well-formed orders in the store.
///
/// Stateless between cycles: a failed fetch skips the cycle and the next
/// one retries from scratch.
pub struct Ingester {
    reader: Arc<dyn SourceReader>,
    store: Arc<dyn OrderStore>,
    clock: MarketClock,
    grace: Duration,
    refresh: std::time::Duration,
}

impl Ingester {
    pub fn new(
        reader: Arc<dyn SourceReader>,
        store: Arc<dyn OrderStore>,
        clock: MarketClock,
        grace: Duration,
        refresh: std::time::Duration,
    ) -> Self {
        Self {
            reader,
            store,
            clock,
            grace,
            refresh,
        }
    }

    /// Fetch, parse, and insert one batch.
    pub async fn run_cycle(&self) -> CycleStats {
        let mut stats = CycleStats::default();

        let batch = match self.reader.fetch().await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Source fetch failed, skipping cycle");
                return stats;
            }
        };

        let sides: [(&[RawRow], OrderSide); 2] = [
            (&batch.buy, OrderSide::Buy),
            (&batch.sell, OrderSide::Sell),
        ];
        for (rows, side) in sides {
            for (idx, row) in rows.iter().enumerate() {
                stats.rows_seen += 1;
                self.ingest_row(row, side, idx, &mut stats).await;
            }
        }

        info!(
            rows = stats.rows_seen,
            inserted = stats.orders_inserted,
            rejected = stats.rows_rejected,
            insert_failures = stats.insert_failures,
            "Ingest cycle complete"
        );
        stats
    }

    async fn ingest_row(&self, row: &RawRow, side: OrderSide, idx: usize, stats: &mut CycleStats) {
        let now = Utc::now();
        let orders = match parse_row(row, side, &self.clock, now) {
            Ok(orders) => orders,
            Err(reject) => {
                stats.rows_rejected += 1;
                if reject.is_routine() {
                    debug!(row = idx, %side, reason = %reject, "Row skipped");
                } else {
                    warn!(row = idx, %side, symbol = %row.symbol, reason = %reject, "Row rejected");
                }
                return;
            }
        };

        for order in orders {
            let expires_at = order.scheduled_at + self.grace;
            let id = order.id.clone();
            match self.store.insert(order, expires_at).await {
                Ok(()) => {
                    stats.orders_inserted += 1;
                    debug!(order_id = %id, %side, "Order cached");
                }
                Err(e) => {
                    // Next cycle re-reads the sheet, so a transient store
                    // failure costs one refresh interval at most.
                    stats.insert_failures += 1;
                    warn!(order_id = %id, error = %e, "Order insert failed");
                }
            }
        }
    }

    /// Run cycles until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(refresh = ?self.refresh, "Ingester started");
        let mut ticker = tokio::time::interval(self.refresh);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Ingester stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RowBatch, StaticReader};
    use chrono::{Datelike, Duration as ChronoDuration};
    use volley_store::MemoryOrderStore;

    fn future_row(symbol: &str, minutes_ahead: i64, qty: &str, lots: &str) -> RawRow {
        let when = Utc::now() + ChronoDuration::minutes(minutes_ahead);
        let local = when.with_timezone(&MarketClock::standard().offset());
        RawRow {
            price: "100.5".to_string(),
            product: "MIS".to_string(),
            name: symbol.to_string(),
            alt_code: String::new(),
            symbol: symbol.to_string(),
            execute_date: format!(
                "{:04}-{:02}-{:02}",
                local.year(),
                local.month(),
                local.day()
            ),
            execute_time: local.format("%H:%M:%S").to_string(),
            total_quantity: qty.to_string(),
            lots: lots.to_string(),
        }
    }

    fn past_row(symbol: &str) -> RawRow {
        let mut row = future_row(symbol, 0, "1", "1");
        let local =
            (Utc::now() - ChronoDuration::minutes(10)).with_timezone(&MarketClock::standard().offset());
        row.execute_time = local.format("%H:%M:%S").to_string();
        row.execute_date = format!(
            "{:04}-{:02}-{:02}",
            local.year(),
            local.month(),
            local.day()
        );
        row
    }

    fn ingester(reader: Arc<StaticReader>, store: Arc<MemoryOrderStore>) -> Ingester {
        Ingester::new(
            reader,
            store,
            MarketClock::standard(),
            ChronoDuration::seconds(10),
            std::time::Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn cycle_inserts_valid_rows_from_both_sides() {
        let reader = Arc::new(StaticReader::new(RowBatch {
            buy: vec![future_row("RELIANCE", 30, "5", "1")],
            sell: vec![future_row("TCS", 45, "2", "1")],
        }));
        let store = Arc::new(MemoryOrderStore::new());
        let stats = ingester(reader, store.clone()).run_cycle().await;

        assert_eq!(stats.rows_seen, 2);
        assert_eq!(stats.orders_inserted, 2);
        assert_eq!(stats.rows_rejected, 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn lot_split_inserts_every_lot() {
        let reader = Arc::new(StaticReader::new(RowBatch {
            buy: vec![future_row("INFY", 30, "10", "3")],
            sell: vec![],
        }));
        let store = Arc::new(MemoryOrderStore::new());
        let stats = ingester(reader, store.clone()).run_cycle().await;

        assert_eq!(stats.orders_inserted, 3);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn past_row_creates_nothing() {
        let reader = Arc::new(StaticReader::new(RowBatch {
            buy: vec![past_row("SBIN")],
            sell: vec![],
        }));
        let store = Arc::new(MemoryOrderStore::new());
        let stats = ingester(reader, store.clone()).run_cycle().await;

        assert_eq!(stats.rows_rejected, 1);
        assert_eq!(stats.orders_inserted, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn malformed_row_does_not_halt_the_cycle() {
        let mut bad = future_row("BAD", 30, "5", "1");
        bad.symbol = String::new();
        let reader = Arc::new(StaticReader::new(RowBatch {
            buy: vec![bad, future_row("GOOD", 30, "5", "1")],
            sell: vec![],
        }));
        let store = Arc::new(MemoryOrderStore::new());
        let stats = ingester(reader, store.clone()).run_cycle().await;

        assert_eq!(stats.rows_rejected, 1);
        assert_eq!(stats.orders_inserted, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn reingestion_is_idempotent() {
        let reader = Arc::new(StaticReader::new(RowBatch {
            buy: vec![future_row("RELIANCE", 30, "5", "1")],
            sell: vec![],
        }));
        let store = Arc::new(MemoryOrderStore::new());
        let ing = ingester(reader, store.clone());

        ing.run_cycle().await;
        ing.run_cycle().await;
        assert_eq!(store.len(), 1);
    }
}
