//! Bounded retry with exponential backoff for stage handlers.

use std::future::Future;
use std::time::Duration;

use lantern_core::emit;
use lantern_core::metrics::events::HandlerRetried;
use tracing::warn;

use crate::error::StageError;

/// Backoff schedule for handler retries.
///
/// Attempt numbers are 1-based. Attempt 1 runs immediately; attempt
/// `n` waits `initial_delay * multiplier^(n-2)`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before running `attempt`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(attempt as i32 - 2);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Run `operation` under `policy`, passing the attempt number to every
/// invocation.
///
/// Terminal errors stop the loop on the attempt that produced them.
/// Otherwise the operation runs up to `max_attempts` times and the
/// last error is returned.
pub async fn run_with_retry<F, Fut>(
    policy: &RetryPolicy,
    queue: &str,
    mut operation: F,
) -> Result<(), StageError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), StageError>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(()) => return Ok(()),
            Err(error) if error.is_terminal() => {
                warn!(%error, queue, attempt, "Terminal failure, giving up");
                return Err(error);
            }
            Err(error) if attempt >= policy.max_attempts => {
                warn!(%error, queue, attempt, "Retries exhausted");
                return Err(error);
            }
            Err(error) => {
                let delay = policy.delay_before(attempt + 1);
                warn!(
                    %error,
                    queue,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Attempt failed, retrying"
                );
                emit!(HandlerRetried {
                    queue: queue.to_string(),
                    attempt: attempt + 1,
                });
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
