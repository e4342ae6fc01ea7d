use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Bounded retry with linear backoff: attempt `n` waits `delay * n` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Run `op` until it succeeds, `should_retry` rejects the error, or the
/// policy's retries are spent. The last error is returned.
pub async fn retry_async<T, E, F, Fut, P>(
    policy: RetryPolicy,
    label: &str,
    should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retries < policy.max_retries && should_retry(&e) => {
                retries += 1;
                tracing::warn!(
                    error = %e,
                    retry = retries,
                    max_retries = policy.max_retries,
                    "{} failed, retrying...",
                    label
                );
                sleep(policy.delay * retries).await;
            }
            Err(e) => {
                if retries > 0 {
                    tracing::error!(error = %e, retries, "{} failed after all retries", label);
                }
                return Err(e);
            }
        }
    }
}
