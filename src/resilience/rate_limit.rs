//! Minimum-interval pacing for submissions shared across wallets

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces calls at least `min_interval` apart
///
/// Callers queue on the mutex, so slots are handed out in arrival order.
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next slot is free and claim it
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + self.min_interval);

        if slot > now {
            tokio::time::sleep_until(slot).await;
        }
    }
}
