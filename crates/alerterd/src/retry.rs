//! Retry budget and requeue backoff.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::config::{RequeueConfig, RetryConfig};

/// Bounded attempts with a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: config.delay(),
        }
    }
}

impl RetryPolicy {
    /// Check if another attempt may follow attempt number `attempt` (1-based).
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Run `op` until it succeeds or the policy's budget is spent.
///
/// `on_failure` sees every failed attempt with its 1-based number before the
/// delay. Returns the number of attempts made alongside the outcome.
pub async fn retry_with_policy<F, Fut, T, E, H>(
    policy: &RetryPolicy,
    mut op: F,
    mut on_failure: H,
) -> (u32, Result<T, E>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(u32, &E),
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return (attempt, Ok(value)),
            Err(e) => {
                on_failure(attempt, &e);
                if !policy.should_retry(attempt) {
                    return (attempt, Err(e));
                }
                sleep(policy.delay).await;
            }
        }
    }
}

/// Exponential delay between requeue rounds.
///
/// Grows with every round that ends without a delivery and starts over
/// once anything gets through.
#[derive(Debug, Clone)]
pub struct RequeueBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    round: u32,
}

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self::from(&RequeueConfig::default())
    }
}

impl From<&RequeueConfig> for RequeueBackoff {
    fn from(config: &RequeueConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            multiplier: config.backoff_multiplier,
            round: 1,
        }
    }
}

impl RequeueBackoff {
    /// Delay before the next requeue round.
    #[must_use]
    pub fn current(&self) -> Duration {
        let exponent = i32::try_from(self.round.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }

    /// Grow the delay after a round that delivered nothing.
    pub fn backoff(&mut self) {
        if self.current() < self.max_delay {
            self.round = self.round.saturating_add(1);
        }
        info!(delay_ms = self.current().as_millis() as u64, "increasing requeue backoff");
    }

    /// Start over after a successful delivery.
    pub fn reset(&mut self) {
        self.round = 1;
    }
}
