//! Bounded availability checks.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

/// Run a probe under a time ceiling.
///
/// A probe that times out or panics counts as unavailable.
pub async fn probe_with_timeout<F>(name: &str, timeout: Duration, probe: F) -> bool
where
    F: Future<Output = bool>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(probe).catch_unwind()).await {
        Ok(Ok(available)) => {
            tracing::debug!(probe = %name, available, "Probe finished");
            available
        }
        Ok(Err(_)) => {
            tracing::warn!(probe = %name, "Probe panicked, treating as unavailable");
            false
        }
        Err(_) => {
            tracing::debug!(probe = %name, timeout_secs = timeout.as_secs(), "Probe timed out");
            false
        }
    }
}

/// `GET url` returns a 2xx within `timeout`.
pub async fn http_ok(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    timeout: Duration,
) -> bool {
    let mut request = client.get(url).timeout(timeout);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    match request.send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Health request failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_counts_as_unavailable() {
        let available = probe_with_timeout("slow", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            true
        })
        .await;
        assert!(!available);
    }

    #[tokio::test]
    async fn test_panicking_probe_counts_as_unavailable() {
        fn explode() -> bool {
            panic!("probe exploded")
        }

        let available =
            probe_with_timeout("broken", Duration::from_secs(5), async { explode() }).await;
        assert!(!available);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_not_ok() {
        let client = reqwest::Client::new();
        assert!(!http_ok(&client, "http://127.0.0.1:9/health", None, Duration::from_secs(2)).await);
    }
}
