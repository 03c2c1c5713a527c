// ── Retry policy ──

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::CoreError;

/// Bounded attempts with an incrementing delay: `step * n`, capped at `max`.
///
/// Only failures for which [`CoreError::is_retryable`] holds consume the
/// budget; anything else is returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub step: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, step: Duration, max: Duration) -> Self {
        Self {
            attempts,
            step,
            max,
        }
    }

    /// A policy that makes a single attempt.
    pub const fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.max)
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.delay(attempt);
                    warn!(task = label, attempt, ?delay, error = %e, "retryable failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
