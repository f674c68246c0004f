//! Binance REST Snapshot Client
//!
//! HTTP client wrapper for the depth snapshot endpoint. Every fetch passes
//! through the GCRA rate limiter before hitting the wire; 429 responses are
//! retried with exponential backoff inside the call.

use crate::binance::rate_limiter::RestRateLimiter;
use crate::binance::types::DepthSnapshot;
use crate::error::EngineError;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Maximum 429 retries before surfacing a rate limit error
const MAX_RETRIES: u32 = 3;

/// REST client for order book snapshots
///
/// Wraps reqwest::Client with engine-specific configuration including
/// timeouts, base URL and a shared client-side rate limiter.
#[derive(Clone, Debug)]
pub struct SnapshotClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<RestRateLimiter>,
}

impl SnapshotClient {
    /// Creates a snapshot client with default settings
    ///
    /// - Timeout: 10 seconds
    /// - User-Agent: microstructure-engine/0.1.0
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Creates a snapshot client with a custom request timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("microstructure-engine/0.1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            rate_limiter: Arc::new(RestRateLimiter::new()),
        }
    }

    /// Returns the configured base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches a depth snapshot for the given symbol
    ///
    /// Calls GET /api/v3/depth with the requested level count. Waits for
    /// rate limit permission first; retries HTTP 429 up to 3 times with
    /// exponential backoff.
    ///
    /// # Errors
    /// * `Connection` - network failures, timeouts, 5xx responses
    /// * `RateLimit` - HTTP 429 after max retries or limiter queue timeout
    /// * `Parse` - invalid JSON response
    pub async fn fetch_depth(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<DepthSnapshot, EngineError> {
        self.rate_limiter.wait().await?;

        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            limit
        );

        let mut retry_count = 0;
        loop {
            let resp = self.client.get(&url).send().await.map_err(EngineError::from)?;
            let status = resp.status();

            if status.as_u16() == 429 {
                if retry_count >= MAX_RETRIES {
                    return Err(EngineError::RateLimit(format!(
                        "Depth snapshot rate limited after {} retries",
                        MAX_RETRIES
                    )));
                }

                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or_else(|| 2_u64.pow(retry_count));

                tracing::warn!(
                    symbol = %symbol,
                    retry = retry_count + 1,
                    wait_secs = retry_after,
                    "Depth snapshot hit 429, backing off"
                );

                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(EngineError::from(resp.error_for_status().unwrap_err()));
            }

            let snapshot: DepthSnapshot = resp.json().await.map_err(EngineError::from)?;

            if snapshot.last_update_id <= 0 {
                return Err(EngineError::Parse(format!(
                    "Invalid snapshot lastUpdateId: {}",
                    snapshot.last_update_id
                )));
            }

            tracing::debug!(
                symbol = %symbol,
                update_id = snapshot.last_update_id,
                bid_levels = snapshot.bids.len(),
                ask_levels = snapshot.asks.len(),
                "Fetched depth snapshot"
            );

            return Ok(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_depth_parses_snapshot() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"lastUpdateId": 555, "bids": [["100.0", "1.5"]], "asks": [["101.0", "2.0"]]}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = SnapshotClient::new(server.uri());
        let snapshot = client.fetch_depth("btcusdt", 100).await.unwrap();

        assert_eq!(snapshot.last_update_id, 555);
        assert_eq!(snapshot.bids[0][0], "100.0");
        assert_eq!(snapshot.asks[0][1], "2.0");
    }

    #[tokio::test]
    async fn test_fetch_depth_rejects_invalid_update_id() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"lastUpdateId": 0, "bids": [], "asks": []}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = SnapshotClient::new(server.uri());
        let err = client.fetch_depth("BTCUSDT", 100).await.unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[tokio::test]
    async fn test_fetch_depth_maps_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = SnapshotClient::new(server.uri());
        let err = client.fetch_depth("BTCUSDT", 100).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
