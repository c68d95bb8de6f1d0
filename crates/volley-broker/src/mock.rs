//! In-process broker for mock mode and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use volley_core::Order;

use crate::error::{BrokerError, BrokerResult};
use crate::{BrokerClient, Placement, SymbolStatus};

/// Which channel a mock placement went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementChannel {
    Regular,
    Amo,
}

/// One recorded placement.
#[derive(Debug, Clone)]
pub struct RecordedPlacement {
    pub order: Order,
    pub channel: PlacementChannel,
    pub at: DateTime<Utc>,
}

/// Broker that records placements instead of sending them anywhere.
///
/// Failures are injected per-call: each queued error fails exactly one
/// subsequent placement, in order.
#[derive(Default)]
pub struct MockBroker {
    placements: Mutex<Vec<RecordedPlacement>>,
    failures: Mutex<VecDeque<BrokerError>>,
    counter: AtomicU64,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next placement attempt.
    pub fn fail_next(&self, err: BrokerError) {
        self.failures.lock().push_back(err);
    }

    pub fn placements(&self) -> Vec<RecordedPlacement> {
        self.placements.lock().clone()
    }

    pub fn placement_count(&self) -> usize {
        self.placements.lock().len()
    }

    pub fn channel_count(&self, channel: PlacementChannel) -> usize {
        self.placements
            .lock()
            .iter()
            .filter(|p| p.channel == channel)
            .count()
    }

    fn record(&self, order: &Order, channel: PlacementChannel) -> BrokerResult<Placement> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.placements.lock().push(RecordedPlacement {
            order: order.clone(),
            channel,
            at: Utc::now(),
        });
        info!(order_id = %order.id, ?channel, "Mock broker accepted order");
        Ok(Placement {
            broker_ref: format!("MOCK-{n}"),
        })
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn place_regular(&self, order: &Order) -> BrokerResult<Placement> {
        self.record(order, PlacementChannel::Regular)
    }

    async fn place_amo(&self, order: &Order) -> BrokerResult<Placement> {
        self.record(order, PlacementChannel::Amo)
    }

    async fn health(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn validate_symbol(&self, _exchange: &str, _symbol: &str) -> BrokerResult<SymbolStatus> {
        Ok(SymbolStatus::Known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use volley_core::{OrderId, OrderSide, OrderType, DEFAULT_EXCHANGE};

    fn order() -> Order {
        let scheduled = Utc::now();
        Order {
            id: OrderId::from_schedule("XYZ", scheduled),
            symbol: "XYZ".to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: dec!(10),
            quantity: 1,
            scheduled_at: scheduled,
            created_at: scheduled,
            is_amo: false,
        }
    }

    #[tokio::test]
    async fn records_per_channel() {
        let broker = MockBroker::new();
        broker.place_regular(&order()).await.unwrap();
        broker.place_amo(&order()).await.unwrap();
        broker.place_amo(&order()).await.unwrap();

        assert_eq!(broker.channel_count(PlacementChannel::Regular), 1);
        assert_eq!(broker.channel_count(PlacementChannel::Amo), 2);
    }

    #[tokio::test]
    async fn injected_failure_consumes_one_call() {
        let broker = MockBroker::new();
        broker.fail_next(BrokerError::Server("simulated".into()));

        assert!(broker.place_regular(&order()).await.is_err());
        assert!(broker.place_regular(&order()).await.is_ok());
        assert_eq!(broker.placement_count(), 1);
    }

    #[tokio::test]
    async fn broker_refs_are_unique() {
        let broker = MockBroker::new();
        let a = broker.place_regular(&order()).await.unwrap();
        let b = broker.place_regular(&order()).await.unwrap();
        assert_ne!(a.broker_ref, b.broker_ref);
    }

    #[tokio::test]
    async fn every_symbol_is_known() {
        let broker = MockBroker::new();
        assert_eq!(
            broker.validate_symbol("NSE", "ANYTHING").await.unwrap(),
            SymbolStatus::Known
        );
    }
}
