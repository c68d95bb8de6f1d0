//! Due-order dispatch.
//!
//! `run_once` drains the store's due set through a fixed worker pool;
//! each order goes through the lock → gate → place → remove protocol, so
//! every order is attempted at most once per lock generation and removed
//! on any terminal outcome.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use volley_broker::{BrokerClient, RateGate};
use volley_core::{DispatchProfile, ExecutionOutcome, Order};
use volley_store::OrderStore;

use crate::error::{DispatchError, DispatchResult};

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Worker pool size W.
    pub worker_pool_size: usize,
    /// Cadence of `run_once` in continuous mode.
    pub check_interval: std::time::Duration,
    /// Cadence of the store/broker health probe.
    pub health_interval: std::time::Duration,
    /// Execution-lock TTL. Must exceed the broker call deadline so a live
    /// attempt is never raced by a second dispatcher.
    pub lock_ttl: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 5,
            check_interval: std::time::Duration::from_secs(1),
            health_interval: std::time::Duration::from_secs(300),
            lock_ttl: Duration::seconds(30),
        }
    }
}

/// Drains due orders against the broker with bounded concurrency.
pub struct Dispatcher {
    store: Arc<dyn OrderStore>,
    broker: Arc<dyn BrokerClient>,
    gate: Arc<RateGate>,
    config: DispatcherConfig,
    health_probe: Arc<tokio::sync::Mutex<()>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn OrderStore>,
        broker: Arc<dyn BrokerClient>,
        gate: Arc<RateGate>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            broker,
            gate,
            config,
            health_probe: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Execute every order due at `now`. Returns the outcomes of the
    /// attempts that reached a terminal state; contended and cancelled
    /// orders produce none.
    pub async fn run_once(
        self: &Arc<Self>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> DispatchResult<Vec<ExecutionOutcome>> {
        let due = self.store.due(now).await.map_err(DispatchError::Store)?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = due.len(), "Orders due for execution");

        // Workers pull from a shared FIFO queue, so hand-off preserves the
        // store's due ordering even though completion order does not.
        let queue = Arc::new(Mutex::new(VecDeque::from(due)));
        let workers = self.config.worker_pool_size.max(1);
        let mut pool = JoinSet::new();

        for worker_id in 0..workers {
            let this = Arc::clone(self);
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            pool.spawn(async move {
                let mut outcomes = Vec::new();
                loop {
                    if cancel.is_cancelled() {
                        debug!(worker_id, "Worker stopping on cancellation");
                        break;
                    }
                    let Some(order) = queue.lock().pop_front() else {
                        break;
                    };
                    if let Some(outcome) = this.dispatch_order(worker_id, order, &cancel).await {
                        outcomes.push(outcome);
                    }
                }
                outcomes
            });
        }

        let mut all = Vec::new();
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(outcomes) => all.extend(outcomes),
                Err(e) => error!(error = %e, "Dispatch worker panicked"),
            }
        }
        Ok(all)
    }

    /// One attempt for one order. Returns `None` when the order was left
    /// in the store (lock contention, cancellation, lock error).
    async fn dispatch_order(
        &self,
        worker_id: usize,
        order: Order,
        cancel: &CancellationToken,
    ) -> Option<ExecutionOutcome> {
        let started = Utc::now();
        let scheduler_delay = (started - order.scheduled_at).max(Duration::zero());
        info!(
            worker_id,
            order_id = %order.id,
            scheduler_delay_ms = scheduler_delay.num_milliseconds(),
            "Processing due order"
        );

        match self.store.try_lock(&order.id, self.config.lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(order_id = %order.id, "Order already being processed elsewhere, skipping");
                return None;
            }
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Lock acquisition failed, skipping");
                return None;
            }
        }

        let outcome = self.locked_dispatch(&order, started, cancel).await;

        if let Err(e) = self.store.unlock(&order.id).await {
            warn!(order_id = %order.id, error = %e, "Lock release failed");
        }

        if let Some(outcome) = &outcome {
            match serde_json::to_string(outcome) {
                Ok(json) => info!(profile = %json, "Dispatch attempt profiled"),
                Err(e) => warn!(error = %e, "Failed to encode dispatch profile"),
            }
        }
        outcome
    }

    /// The attempt body, run while holding the execution lock.
    async fn locked_dispatch(
        &self,
        order: &Order,
        started: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Option<ExecutionOutcome> {
        // The due list may be stale by now: another process can have
        // completed and removed this order between our due() and the lock.
        match self.store.contains(&order.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(order_id = %order.id, "Order already completed elsewhere");
                return None;
            }
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Revalidation failed, skipping");
                return None;
            }
        }

        if self.gate.acquire(cancel).await.is_err() {
            info!(order_id = %order.id, "Cancelled while waiting for rate gate, order kept");
            return None;
        }
        let gate_cleared = Utc::now();

        let place = async {
            if order.is_amo {
                self.broker.place_amo(order).await
            } else {
                self.broker.place_regular(order).await
            }
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                // Fate unknown; the entry stays for the next run, bounded
                // by its expiry and the lock TTL.
                warn!(order_id = %order.id, "Cancelled mid broker call, order kept");
                return None;
            }
            result = place => result,
        };
        let finished = Utc::now();

        // Terminal after any attempt: the scheduled instant has passed and
        // replaying later would violate the caller's intent.
        if let Err(e) = self.store.remove(&order.id).await {
            error!(order_id = %order.id, error = %e, "Failed to remove order after attempt");
        }

        let profile = DispatchProfile {
            scheduler_delay_ms: (started - order.scheduled_at).num_milliseconds().max(0),
            broker_call_ms: (finished - gate_cleared).num_milliseconds().max(0),
            total_ms: (finished - started).num_milliseconds().max(0),
        };

        match result {
            Ok(placement) => {
                info!(
                    order_id = %order.id,
                    broker_ref = %placement.broker_ref,
                    amo = order.is_amo,
                    "Order placed"
                );
                Some(ExecutionOutcome::success(
                    order.id.clone(),
                    placement.broker_ref,
                    profile,
                ))
            }
            Err(err) => {
                if err.kind() == "auth" {
                    error!(
                        order_id = %order.id,
                        error = %err,
                        "BROKER AUTHENTICATION FAILED - rotate the access token"
                    );
                } else {
                    error!(
                        order_id = %order.id,
                        symbol = %order.symbol,
                        side = %order.side,
                        quantity = order.quantity,
                        kind = err.kind(),
                        error = %err,
                        "Order placement failed"
                    );
                }
                Some(ExecutionOutcome::failure(
                    order.id.clone(),
                    err.kind(),
                    err.detail(),
                    profile,
                ))
            }
        }
    }

    /// Tight dispatch loop plus the low-frequency health tick. Returns on
    /// cancellation.
    pub async fn run_continuous(self: &Arc<Self>, cancel: CancellationToken) {
        info!(
            check_interval = ?self.config.check_interval,
            health_interval = ?self.config.health_interval,
            workers = self.config.worker_pool_size,
            "Dispatcher started"
        );
        let mut check = tokio::time::interval(self.config.check_interval);
        check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut health = tokio::time::interval(self.config.health_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatcher stopping");
                    return;
                }
                _ = check.tick() => {
                    match self.run_once(Utc::now(), &cancel).await {
                        Ok(outcomes) if !outcomes.is_empty() => {
                            let failed = outcomes.iter().filter(|o| !o.success).count();
                            info!(
                                attempted = outcomes.len(),
                                failed,
                                "Dispatch cycle complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            // Next tick retries; the store is the source of
                            // truth and nothing was mutated.
                            error!(error = %e, "Due query failed, skipping cycle");
                        }
                    }
                }
                _ = health.tick() => {
                    self.spawn_health_check();
                }
            }
        }
    }

    /// Probe store and broker health without overlapping a previous probe.
    fn spawn_health_check(&self) {
        let Ok(guard) = Arc::clone(&self.health_probe).try_lock_owned() else {
            debug!("Health check already in flight, skipping");
            return;
        };
        let store = Arc::clone(&self.store);
        let broker = Arc::clone(&self.broker);
        tokio::spawn(async move {
            let _guard = guard;
            match store.health().await {
                Ok(()) => debug!("Store health ok"),
                Err(e) => warn!(error = %e, "Store health check failed"),
            }
            // Unhealthy is non-fatal either way: orders are still attempted
            // and fail per-order with a classified error.
            match broker.health().await {
                Ok(()) => debug!("Broker health ok"),
                Err(e) => warn!(error = %e, "Broker health check failed"),
            }
        });
    }
}
