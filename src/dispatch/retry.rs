//! Retry scheduling policy.
//!
//! The pipeline never re-queues a failed message on its own; retry is an
//! explicit, policy-driven step. The policy computes an exponential
//! backoff with jitter from the attempt counter and writes the cursor
//! through the store, which enforces the attempt cap.

use chrono::Duration;
use rand::Rng;

use crate::config::RetryConfig;
use crate::message::{MessageStore, ScheduleOutcome, StoreError};

pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Backoff delay before the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial_ms = self.config.initial_delay_seconds as f64 * 1000.0;
        let max_ms = self.config.max_delay_seconds as f64 * 1000.0;

        let exponent = attempt.saturating_sub(1).min(30);
        let base = initial_ms * self.config.multiplier.powi(exponent as i32);
        let capped = base.min(max_ms);

        let final_ms = if self.config.jitter_factor > 0.0 {
            let jitter_range = capped * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
            (capped + jitter).max(1.0)
        } else {
            capped.max(1.0)
        };

        Duration::milliseconds(final_ms as i64)
    }

    /// Schedule a retry for a failed message, or mark it dead once the
    /// attempt cap is reached.
    pub async fn schedule(
        &self,
        store: &MessageStore,
        owner_id: i64,
        message_id: i64,
    ) -> Result<ScheduleOutcome, StoreError> {
        let msg = store
            .get(owner_id, message_id)
            .await?
            .ok_or(StoreError::NotFound {
                owner_id,
                id: message_id,
            })?;

        let delay = self.delay_for(msg.retries.max(1) as u32);
        store
            .schedule_retry(owner_id, message_id, delay, self.config.max_attempts)
            .await
    }
}
