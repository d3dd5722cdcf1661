//! Spacing for outgoing Bot API messages.
//!
//! Telegram throttles bots that post too quickly in the same group, so
//! replies are spaced by a minimum interval and a flood wait reported by
//! the server pushes the next send further out.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Hands out send slots at least `min_interval` apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,

    /// Earliest instant the next send may go out. `None` until the first send.
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits for the next free slot and takes it.
    ///
    /// Returns how long the caller was held back.
    pub async fn acquire(&self) -> Duration {
        let mut slot = self.next_slot.lock().await;

        let wait = slot.map_or(Duration::ZERO, |at| {
            at.saturating_duration_since(Instant::now())
        });
        if !wait.is_zero() {
            debug!(?wait, "Holding back outgoing message");
            tokio::time::sleep(wait).await;
        }

        *slot = Some(Instant::now() + self.min_interval);
        wait
    }

    /// Pushes the next slot at least `retry_after` seconds into the future.
    pub async fn back_off(&self, retry_after: u32) {
        warn!(retry_after, "Telegram asked to slow down");

        let until = Instant::now() + Duration::from_secs(u64::from(retry_after));
        let mut slot = self.next_slot.lock().await;
        *slot = Some(slot.map_or(until, |at| at.max(until)));
    }
}
