use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::Cancellation;
use crate::error::SwapError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Runs `f` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. Only [`SwapError::Transient`] is retried.
pub async fn retry<T, F, Fut>(
    description: &str,
    policy: &RetryPolicy,
    cancel: Option<&Cancellation>,
    mut f: F,
) -> Result<T, SwapError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SwapError>>,
{
    let mut sleep_for = policy.base_delay;
    let mut attempt = 1;

    loop {
        if cancel.is_some_and(Cancellation::is_cancelled) {
            return Err(SwapError::Cancelled);
        }

        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                tracing::debug!(
                    what = description,
                    attempt,
                    error = %err,
                    "transient failure, retrying"
                );
            }
            Err(err) => return Err(err),
        }

        match cancel {
            Some(cancel) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SwapError::Cancelled),
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            }
            None => tokio::time::sleep(sleep_for).await,
        }
        sleep_for = (sleep_for * 2).min(policy.max_delay);
        attempt += 1;
    }
}
