use std::time::Duration;

use tokio::time::Instant;

/// Calls `poll` until it yields a value, panicking after `timeout`.
pub async fn eventually<T, F, Fut>(description: &str, timeout: Duration, mut poll: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = poll().await {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {description}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
