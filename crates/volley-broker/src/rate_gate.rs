//! Token-bucket admission control for broker calls.
//!
//! Broker rate ceilings are small (single-digit requests per second in
//! production); exceeding them burns the attempt on a throttle response.
//! The gate converts over-subscription into queueing: callers block in
//! `acquire` until a token is available or shutdown is signalled.

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Returned when shutdown interrupts a waiting caller.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("rate gate wait cancelled")]
pub struct GateCancelled;

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

/// Shared token bucket: `rate` tokens per second, at most `burst` banked.
pub struct RateGate {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl RateGate {
    pub fn new(rate: u32, burst: u32) -> Self {
        let rate = f64::from(rate.max(1));
        let burst = f64::from(burst.max(1));
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Take a token, or compute how long until one accrues.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.refilled_at = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.rate))
        }
    }

    /// Block until a token is available. Cancel-safe: no token is consumed
    /// when the wait is interrupted.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), GateCancelled> {
        loop {
            match self.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(GateCancelled),
                        _ = sleep(wait) => {}
                    }
                }
            }
        }
    }
}
