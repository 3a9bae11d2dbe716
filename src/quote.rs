//! Quote requests raced across several intermediaries.

use std::time::Duration;

use tokio::task::JoinSet;

use crate::error::SwapError;

/// Outcome of one intermediary's quote request.
#[derive(Debug)]
pub struct QuoteResult<T> {
    pub url: String,
    pub result: Result<T, SwapError>,
}

/// Requests a quote from every `url` concurrently. Once the first quote
/// succeeds, the others get at most `bound` more; whatever has not
/// answered by then is aborted and left out of the result. Failures are
/// returned alongside successes in arrival order.
pub async fn race_quotes<T, F, Fut>(urls: &[String], bound: Duration, request: F) -> Vec<QuoteResult<T>>
where
    T: Send + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, SwapError>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for url in urls {
        let fut = request(url.clone());
        let url = url.clone();
        set.spawn(async move {
            let result = fut.await;
            QuoteResult { url, result }
        });
    }

    let mut results = Vec::with_capacity(urls.len());
    let mut deadline = None;
    loop {
        let joined = match deadline {
            None => set.join_next().await,
            Some(deadline) => match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::debug!(pending = set.len(), "quote race bound reached");
                    set.abort_all();
                    break;
                }
            },
        };
        let Some(joined) = joined else {
            break;
        };
        match joined {
            Ok(quote) => {
                if quote.result.is_ok() && deadline.is_none() {
                    deadline = Some(tokio::time::Instant::now() + bound);
                }
                if let Err(err) = &quote.result {
                    tracing::debug!(url = %quote.url, error = %err, "quote request failed");
                }
                results.push(quote);
            }
            Err(err) => tracing::error!(error = %err, "quote task panicked"),
        }
    }
    results
}
