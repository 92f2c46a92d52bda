//! Minimum-spacing rate limiter
//!
//! `acquire` returns once `min_delay` has elapsed since the previous acquire
//! completed. Waiters queue on a tokio `Mutex`, which hands out the lock in FIFO
//! order, so the Nth concurrent caller waits for the (N-1)th and then applies its
//! own delay against the updated timestamp. No queue limit.

use crate::clock::Clock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct RateLimiter {
    min_delay: Duration,
    clock: Arc<dyn Clock>,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_delay: Duration::from_millis(min_delay_ms),
            clock,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Wait if necessary to keep `min_delay` between calls
    pub async fn acquire(&self) {
        if self.min_delay.is_zero() {
            return;
        }

        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = self.clock.now().saturating_duration_since(last_time);
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                self.clock.sleep(wait_time).await;
            }
        }

        *last = Some(self.clock.now());
    }

    /// Forget the last call; the next `acquire` returns immediately
    pub async fn reset(&self) {
        *self.last_call.lock().await = None;
    }
}
