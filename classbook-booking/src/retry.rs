//! Bounded retry for check-then-insert races on a capacity key.
//!
//! Losing a race is expected under load and is not a business rejection, so the whole
//! check is re-evaluated a few times before `Conflict(ConcurrentUpdate)` reaches the caller.
//! Only contention is retried; every other error returns immediately.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use classbook_core::CoreResult;

/// Longest backoff as a multiple of the initial delay.
const MAX_DELAY_FACTOR: u32 = 20;

#[derive(Debug, Clone)]
pub struct ContentionPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(25))
    }
}

impl ContentionPolicy {
    /// The backoff cap scales with `initial_delay`, so a long configured delay is never clipped.
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay: initial_delay.saturating_mul(MAX_DELAY_FACTOR),
        }
    }

    /// Doubles per attempt, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub async fn retry_on_contention<T, F, Fut>(
    policy: &ContentionPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        match attempt_fn().await {
            Err(err) if err.is_contention() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(operation, attempt = attempt + 1, ?delay, "capacity race lost, retrying");
                sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
