//! Bounded exponential backoff for background writes and provider calls

use callhub_core::{AppError, AppResult, EngineConfig};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempts and base delay; the delay doubles after each failed attempt
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.persist_max_attempts, config.persist_base_backoff())
    }

    /// Delay after the `attempt`-th failure (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Retries gave up
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub last_error: AppError,
}

/// Run `op` until it succeeds, fails permanently or runs out of attempts
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, Exhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && e.is_transient() => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(Exhausted {
                    attempts: attempt,
                    last_error: e,
                })
            }
        }
    }
}
