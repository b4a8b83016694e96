//! Retry with exponential backoff for transient store failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::store::StoreError;

/// Run `f` until it succeeds, fails permanently, or retries run out.
///
/// Only [`StoreError::is_transient`] errors are retried. The last error is
/// returned once `policy.max_retries` is exhausted.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, op: &str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt > policy.max_retries {
                    warn!(op = op, retries = policy.max_retries, error = %e, "Max retries reached");
                    return Err(e);
                }

                let delay = jittered(policy.backoff_for(attempt), policy.jitter);
                warn!(
                    op = op,
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying store call"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Scale `base` by a random factor in [0.7, 1.3) when `jitter` is set.
fn jittered(base: Duration, jitter: bool) -> Duration {
    if !jitter {
        return base;
    }
    let factor = rand::thread_rng().gen_range(0.7..1.3);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}
