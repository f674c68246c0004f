//! Derivatives context cache
//!
//! Single-producer, many-reader cache of options/futures context (basis,
//! skew, gamma exposure) consumed as optional features downstream. One
//! refresh task per process fetches with a hard 30s timeout; a failed
//! refresh preserves the last snapshot. A disabled cache is an inert value
//! that always returns absence, so the hot path never branches on
//! configuration.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// HTTP timeout for a single refresh
const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Point-in-time derivatives context; every field individually optional
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivativesSnapshot {
    /// Annualized perp/spot basis
    pub basis_apr: Option<f64>,

    /// 25-delta options skew in percent
    pub skew_pct: Option<f64>,

    /// Total dealer gamma exposure
    pub total_gex: Option<f64>,

    /// Exchange time the upstream data was computed (ms)
    pub updated_at: i64,
}

/// Shared cache handle
///
/// Cloning is cheap; readers take a snapshot load, never a lock across an
/// await point.
#[derive(Debug, Clone)]
pub struct DerivativesCache {
    inner: Option<Arc<RwLock<Option<DerivativesSnapshot>>>>,
}

impl DerivativesCache {
    /// Create an enabled cache (initially empty)
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(RwLock::new(None))),
        }
    }

    /// Create the inert variant: always absent, no refresh task
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Latest snapshot, absent while disabled or before the first refresh
    pub fn snapshot(&self) -> Option<DerivativesSnapshot> {
        self.inner
            .as_ref()
            .and_then(|cell| cell.read().ok().and_then(|guard| guard.clone()))
    }

    /// Replace the cached snapshot (producer side)
    fn store(&self, snapshot: DerivativesSnapshot) {
        if let Some(cell) = &self.inner {
            if let Ok(mut guard) = cell.write() {
                *guard = Some(snapshot);
            }
        }
    }

    /// Spawn the periodic refresh task
    ///
    /// Fetches `url` every `interval_s` seconds with a 30s timeout. Any
    /// failure keeps the previous value and logs at warn.
    pub fn spawn_refresh(
        &self,
        url: String,
        interval_s: u64,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let client = match reqwest::Client::builder()
                .timeout(REFRESH_TIMEOUT)
                .user_agent("microstructure-engine/0.1.0")
                .build()
            {
                Ok(client) => client,
                Err(e) => {
                    warn!(error = %e, "Derivatives refresh disabled: HTTP client build failed");
                    return;
                }
            };

            let mut interval = tokio::time::interval(Duration::from_secs(interval_s.max(1)));
            info!(url = %url, interval_s, "Derivatives cache refresh task started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Derivatives refresh task stopping");
                        return;
                    }
                    _ = interval.tick() => {
                        match fetch_snapshot(&client, &url).await {
                            Ok(snapshot) => {
                                debug!(updated_at = snapshot.updated_at, "Derivatives cache refreshed");
                                cache.store(snapshot);
                            }
                            Err(e) => {
                                warn!(error = %e, "Derivatives refresh failed, keeping last value");
                            }
                        }
                    }
                }
            }
        })
    }
}

impl Default for DerivativesCache {
    fn default() -> Self {
        Self::new()
    }
}

async fn fetch_snapshot(
    client: &reqwest::Client,
    url: &str,
) -> Result<DerivativesSnapshot, reqwest::Error> {
    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<DerivativesSnapshot>()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_cache_is_inert() {
        let cache = DerivativesCache::disabled();
        assert!(cache.snapshot().is_none());
    }

    #[test]
    fn test_store_and_snapshot() {
        let cache = DerivativesCache::new();
        assert!(cache.snapshot().is_none());

        cache.store(DerivativesSnapshot {
            basis_apr: Some(0.08),
            skew_pct: None,
            total_gex: Some(-1.2e9),
            updated_at: 1_700_000_000_000,
        });

        let snap = cache.snapshot().unwrap();
        assert_eq!(snap.basis_apr, Some(0.08));
        assert_eq!(snap.skew_pct, None);
    }

    #[tokio::test]
    async fn test_refresh_failure_preserves_last_value() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = DerivativesCache::new();
        cache.store(DerivativesSnapshot {
            basis_apr: Some(0.05),
            skew_pct: Some(-2.0),
            total_gex: None,
            updated_at: 42,
        });

        let client = reqwest::Client::new();
        assert!(fetch_snapshot(&client, &server.uri()).await.is_err());
        // The cached value is untouched by the failed fetch
        assert_eq!(cache.snapshot().unwrap().updated_at, 42);
    }
}
