//! Bounded retry with exponential backoff for ledger calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{LedgerApiError, classify, classify_non_idempotent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Non-idempotent calls only retry rejections the
/// server provably did not act on.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    idempotent: bool,
    mut call: F,
) -> Result<T, LedgerApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerApiError>>,
{
    let mut retry = 0;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let cause = if idempotent {
            classify(&err)
        } else {
            classify_non_idempotent(&err)
        };
        let Some(cause) = cause else {
            return Err(err);
        };
        if retry >= policy.max_retries {
            return Err(err);
        }

        retry += 1;
        let delay = policy.delay_for(retry);
        warn!(
            operation,
            ?cause,
            attempt = retry,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "retrying ledger call: {err}"
        );
        tokio::time::sleep(delay).await;
    }
}
