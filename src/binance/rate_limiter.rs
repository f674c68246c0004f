//! Client-side rate limiter for Binance REST requests
//!
//! Implements GCRA (Generic Cell Rate Algorithm) via the governor crate.
//! Limits snapshot refetches to a conservative budget below the exchange
//! weight limit; resync storms after repeated gaps queue here instead of
//! hammering the REST API.

use crate::error::EngineError;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Maximum requests per minute (conservative buffer below Binance 1200/min)
const MAX_REQUESTS_PER_MINUTE: u32 = 300;

/// Maximum time to wait in queue before rejecting the request
const QUEUE_TIMEOUT_SECS: u64 = 30;

/// Client-side GCRA rate limiter for REST requests
#[derive(Debug)]
pub struct RestRateLimiter {
    limiter: GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    queue_timeout: Duration,
}

impl RestRateLimiter {
    /// Create a limiter with default settings (300 req/min, 30s queue timeout)
    pub fn new() -> Self {
        Self::with_quota(MAX_REQUESTS_PER_MINUTE, QUEUE_TIMEOUT_SECS)
    }

    /// Create a limiter with custom settings (for testing)
    pub fn with_quota(requests_per_minute: u32, queue_timeout_secs: u64) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(requests_per_minute).expect("requests_per_minute must be non-zero"),
        );

        Self {
            limiter: GovernorRateLimiter::direct(quota),
            queue_timeout: Duration::from_secs(queue_timeout_secs),
        }
    }

    /// Wait for rate limit permission (async, with queue timeout)
    ///
    /// Returns Ok(()) when the request is allowed, `EngineError::RateLimit`
    /// if the queue timeout is exceeded.
    pub async fn wait(&self) -> Result<(), EngineError> {
        let wait_result = timeout(self.queue_timeout, async {
            loop {
                match self.limiter.check() {
                    Ok(_) => {
                        debug!("Rate limit permission granted");
                        return;
                    }
                    Err(_) => {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        })
        .await;

        match wait_result {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(
                    timeout_secs = self.queue_timeout.as_secs(),
                    "Rate limit queue timeout exceeded"
                );
                Err(EngineError::RateLimit(format!(
                    "REST limiter queue timeout after {}s",
                    self.queue_timeout.as_secs()
                )))
            }
        }
    }

    /// Check if a request can proceed immediately (non-blocking)
    pub fn check_immediate(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for RestRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
