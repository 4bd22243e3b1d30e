//! Retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::classify::{ErrorLog, StructuredError};
use crate::error::Result;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self { max_retries, base_delay, multiplier }
    }

    /// Block submission: up to 2 retries, 500 ms base, exponential.
    pub const fn submit_block() -> Self {
        Self::new(2, Duration::from_millis(500), 2.0)
    }

    /// Rollback: a single retry, 1 s base.
    pub const fn rollback() -> Self {
        Self::new(1, Duration::from_secs(1), 2.0)
    }
}

/// Runs `operation`, retrying with exponential backoff while the
/// classified error is retryable and `should_retry` agrees. Every
/// failed attempt is recorded in the error log; the last error is
/// returned once retries are exhausted or vetoed.
pub async fn execute_with_retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    context: &str,
    log: &ErrorLog,
    mut operation: F,
    should_retry: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&StructuredError) -> bool,
{
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let entry = log.capture(&err, context);
                if attempt >= policy.max_retries || !entry.retryable || !should_retry(&entry) {
                    return Err(err);
                }
                warn!(
                    context,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );
                sleep(delay).await;
                delay = delay.mul_f64(policy.multiplier);
                attempt += 1;
            }
        }
    }
}
