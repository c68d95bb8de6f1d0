//! End-to-end dispatch scenarios over the in-memory store and mock broker.

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use volley_broker::{BrokerError, MockBroker, PlacementChannel, RateGate};
use volley_core::{Order, OrderId, OrderSide, OrderType, DEFAULT_EXCHANGE};
use volley_dispatch::{Dispatcher, DispatcherConfig};
use volley_store::{MemoryOrderStore, OrderStore};

fn order(symbol: &str, is_amo: bool) -> Order {
    let scheduled = Utc::now();
    Order {
        id: OrderId::from_schedule(symbol, scheduled),
        symbol: symbol.to_string(),
        exchange: DEFAULT_EXCHANGE.to_string(),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        price: dec!(100.00),
        quantity: 5,
        scheduled_at: scheduled,
        created_at: scheduled,
        is_amo,
    }
}

async fn seed(store: &MemoryOrderStore, orders: &[Order]) {
    for o in orders {
        store
            .insert(o.clone(), o.scheduled_at + Duration::seconds(60))
            .await
            .unwrap();
    }
}

fn dispatcher(
    store: Arc<MemoryOrderStore>,
    broker: Arc<MockBroker>,
    config: DispatcherConfig,
) -> Arc<Dispatcher> {
    let gate = Arc::new(RateGate::new(100, 100));
    Dispatcher::new(store, broker, gate, config)
}

#[tokio::test]
async fn regular_order_uses_regular_channel_and_is_removed() {
    let store = Arc::new(MemoryOrderStore::new());
    let broker = Arc::new(MockBroker::new());
    let o = order("XYZ", false);
    seed(&store, std::slice::from_ref(&o)).await;

    let d = dispatcher(store.clone(), broker.clone(), DispatcherConfig::default());
    let outcomes = d
        .run_once(Utc::now() + Duration::seconds(1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert!(outcomes[0].broker_ref.is_some());
    assert_eq!(broker.channel_count(PlacementChannel::Regular), 1);
    assert_eq!(broker.channel_count(PlacementChannel::Amo), 0);
    assert!(store.is_empty());

    let placed = &broker.placements()[0];
    assert_eq!(placed.order.quantity, 5);
    assert_eq!(placed.order.price, dec!(100.00));
}

#[tokio::test]
async fn amo_order_routes_to_amo_channel() {
    let store = Arc::new(MemoryOrderStore::new());
    let broker = Arc::new(MockBroker::new());
    seed(&store, &[order("XYZ", true)]).await;

    let d = dispatcher(store.clone(), broker.clone(), DispatcherConfig::default());
    d.run_once(Utc::now() + Duration::seconds(1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(broker.channel_count(PlacementChannel::Amo), 1);
    assert_eq!(broker.channel_count(PlacementChannel::Regular), 0);
}

#[tokio::test]
async fn failed_attempt_is_terminal() {
    let store = Arc::new(MemoryOrderStore::new());
    let broker = Arc::new(MockBroker::new());
    broker.fail_next(BrokerError::Server("simulated outage".into()));
    seed(&store, &[order("XYZ", false)]).await;

    let d = dispatcher(store.clone(), broker.clone(), DispatcherConfig::default());
    let now = Utc::now() + Duration::seconds(1);
    let outcomes = d.run_once(now, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    assert_eq!(outcomes[0].error_kind.as_deref(), Some("server"));
    // The order is gone: no silent retry on the next cycle.
    assert!(store.is_empty());
    let again = d.run_once(now, &CancellationToken::new()).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(broker.placement_count(), 0);
}

#[tokio::test]
async fn contended_lock_skips_without_eviction() {
    let store = Arc::new(MemoryOrderStore::new());
    let broker = Arc::new(MockBroker::new());
    let o = order("XYZ", false);
    seed(&store, std::slice::from_ref(&o)).await;

    // Another dispatcher holds the execution lock.
    assert!(store.try_lock(&o.id, Duration::seconds(30)).await.unwrap());

    let d = dispatcher(store.clone(), broker.clone(), DispatcherConfig::default());
    let now = Utc::now() + Duration::seconds(1);
    let outcomes = d.run_once(now, &CancellationToken::new()).await.unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(broker.placement_count(), 0);
    assert_eq!(store.len(), 1);

    // Once the holder releases, the order is dispatched normally.
    store.unlock(&o.id).await.unwrap();
    let outcomes = d.run_once(now, &CancellationToken::new()).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn crashed_holder_blocks_until_lock_ttl_then_one_dispatch() {
    let store = Arc::new(MemoryOrderStore::new());
    let broker = Arc::new(MockBroker::new());
    let o = order("K", false);
    seed(&store, std::slice::from_ref(&o)).await;

    // Dispatcher A acquired the lock and died without removing the order.
    assert!(store
        .try_lock(&o.id, Duration::milliseconds(100))
        .await
        .unwrap());

    let d = dispatcher(store.clone(), broker.clone(), DispatcherConfig::default());
    let now = Utc::now() + Duration::seconds(1);

    // Before the TTL lapses, B must not touch the order.
    let outcomes = d.run_once(now, &CancellationToken::new()).await.unwrap();
    assert!(outcomes.is_empty());
    assert_eq!(broker.placement_count(), 0);

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    // After expiry, B dispatches exactly once.
    let outcomes = d.run_once(now, &CancellationToken::new()).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(store.is_empty());

    // No third dispatch.
    let again = d.run_once(now, &CancellationToken::new()).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(broker.placement_count(), 1);
}

#[tokio::test]
async fn concurrent_dispatchers_place_each_order_exactly_once() {
    let store = Arc::new(MemoryOrderStore::new());
    let broker = Arc::new(MockBroker::new());
    let orders: Vec<Order> = (0..6).map(|i| order(&format!("SYM{i}"), false)).collect();
    seed(&store, &orders).await;

    // Two dispatcher processes share the store and broker but not a gate.
    let a = dispatcher(store.clone(), broker.clone(), DispatcherConfig::default());
    let b = dispatcher(store.clone(), broker.clone(), DispatcherConfig::default());

    let now = Utc::now() + Duration::seconds(1);
    let cancel = CancellationToken::new();
    let (ra, rb) = tokio::join!(a.run_once(now, &cancel), b.run_once(now, &cancel));
    let total = ra.unwrap().len() + rb.unwrap().len();

    assert_eq!(total, 6);
    assert_eq!(broker.placement_count(), 6);
    let mut placed: Vec<String> = broker
        .placements()
        .iter()
        .map(|p| p.order.id.to_string())
        .collect();
    placed.sort();
    placed.dedup();
    assert_eq!(placed.len(), 6, "an order was placed twice");
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_gate_paces_a_burst_of_due_orders() {
    let store = Arc::new(MemoryOrderStore::new());
    let broker = Arc::new(MockBroker::new());
    let orders: Vec<Order> = (0..10).map(|i| order(&format!("SYM{i}"), false)).collect();
    seed(&store, &orders).await;

    let gate = Arc::new(RateGate::new(3, 3));
    let d = Dispatcher::new(
        store.clone(),
        broker.clone(),
        gate,
        DispatcherConfig {
            worker_pool_size: 10,
            ..DispatcherConfig::default()
        },
    );

    let outcomes = d
        .run_once(Utc::now() + Duration::seconds(1), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 10);
    assert!(outcomes.iter().all(|o| o.success));

    // 3 tokens banked, the remaining 7 accrue at 3/s: the burst is spread
    // over at least two seconds of wall time.
    let times: Vec<_> = broker.placements().iter().map(|p| p.at).collect();
    let first = times.iter().min().unwrap();
    let last = times.iter().max().unwrap();
    let span = *last - *first;
    assert!(
        span >= Duration::milliseconds(2000),
        "burst placed in {}ms",
        span.num_milliseconds()
    );
}

#[tokio::test]
async fn small_pool_drains_a_larger_due_set() {
    let store = Arc::new(MemoryOrderStore::new());
    let broker = Arc::new(MockBroker::new());
    let orders: Vec<Order> = (0..5).map(|i| order(&format!("SYM{i}"), false)).collect();
    seed(&store, &orders).await;

    let d = dispatcher(
        store.clone(),
        broker.clone(),
        DispatcherConfig {
            worker_pool_size: 2,
            ..DispatcherConfig::default()
        },
    );
    let outcomes = d
        .run_once(Utc::now() + Duration::seconds(1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 5);
    assert!(store.is_empty());
}

#[tokio::test]
async fn empty_store_is_a_quiet_cycle() {
    let store = Arc::new(MemoryOrderStore::new());
    let broker = Arc::new(MockBroker::new());
    let d = dispatcher(store, broker.clone(), DispatcherConfig::default());

    let outcomes = d
        .run_once(Utc::now(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcomes.is_empty());
    assert_eq!(broker.placement_count(), 0);
}

#[tokio::test]
async fn pre_cancelled_token_leaves_orders_in_store() {
    let store = Arc::new(MemoryOrderStore::new());
    let broker = Arc::new(MockBroker::new());
    seed(&store, &[order("XYZ", false)]).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let d = dispatcher(store.clone(), broker.clone(), DispatcherConfig::default());
    let outcomes = d
        .run_once(Utc::now() + Duration::seconds(1), &cancel)
        .await
        .unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(broker.placement_count(), 0);
    assert_eq!(store.len(), 1);
}
