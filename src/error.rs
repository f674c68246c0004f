//! Error Types and Handling
//!
//! Defines the error taxonomy used throughout the engine: transient wire
//! errors (retried inside the transport layer), recoverable synchronization
//! errors (trigger a full book resync), and fatal configuration errors.

use thiserror::Error;

/// Book synchronization failures that require a full resync
///
/// Both variants are recoverable: the owning symbol task discards the book,
/// refetches a REST snapshot and replays buffered diffs. Derived state
/// (iceberg registry, CVD, VPIN buckets) is preserved across a resync.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Gap in the diff sequence: expected `first_update_id = last + 1`
    #[error("update id gap: expected first_update_id {expected}, got {got}")]
    Gap { expected: i64, got: i64 },

    /// Crossed book discovered after applying a diff (best_bid >= best_ask)
    #[error("crossed book after apply: bid {bid} >= ask {ask}")]
    CrossedBook { bid: String, ask: String },

    /// Snapshot arrived behind the already-applied diff stream
    #[error("stale snapshot: snapshot id {snapshot_id} behind stream id {stream_id}")]
    StaleSnapshot { snapshot_id: i64, stream_id: i64 },
}

/// Configuration validation failures (fatal at init)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Whale threshold must be at least 10x the minnow threshold
    #[error("cohort gap violated: whale {whale_usd} < 10 x minnow {minnow_usd}")]
    CohortGap { whale_usd: f64, minnow_usd: f64 },

    /// Thresholds and bucket sizes must be strictly positive
    #[error("non-positive {name}: {value}")]
    NonPositive { name: &'static str, value: f64 },

    /// Contradictory limits (e.g. refill cutoff beyond the rejection horizon)
    #[error("contradictory limits: {0}")]
    Contradictory(String),

    /// Symbol fails the exchange format check
    #[error("invalid trading symbol: {0}")]
    InvalidSymbol(String),

    /// Malformed environment variable
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

/// Main error type for the microstructure engine
///
/// Transient errors are handled inside the wire layer with backoff and only
/// surface here when retries are exhausted. `Sync` errors surface exactly
/// once per gap and cause the engine to resync.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network failures or connectivity issues with the exchange
    #[error("Connection error: {0}")]
    Connection(String),

    /// HTTP 429 responses from the exchange (rate limit exceeded)
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// JSON deserialization or decimal parsing failures
    #[error("Parse error: {0}")]
    Parse(String),

    /// Book synchronization failure (gap or crossed book)
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Fatal configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Unexpected internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns true if this error type should trigger retry logic
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Connection(_) | EngineError::RateLimit(_))
    }

    /// Returns true if this error is recovered by a full book resync
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Sync(_))
    }

    /// Returns error type string for structured log fields
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::Connection(_) => "connection_error",
            EngineError::RateLimit(_) => "rate_limit",
            EngineError::Parse(_) => "parse_error",
            EngineError::Sync(_) => "sync_error",
            EngineError::Config(_) => "config_error",
            EngineError::Internal(_) => "internal_error",
        }
    }
}

// Error conversions from common error types
impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Connection("Request timeout while calling exchange REST API".to_string())
        } else if err.is_connect() {
            EngineError::Connection("Failed to connect to exchange REST API".to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                429 => EngineError::RateLimit(
                    "Too many requests to exchange API. Retry after 60 seconds.".to_string(),
                ),
                418 => EngineError::Connection("IP address banned by exchange".to_string()),
                403 => EngineError::Connection(
                    "WAF limit violated. Reduce request frequency.".to_string(),
                ),
                500..=599 => EngineError::Connection(format!(
                    "Exchange server error (HTTP {})",
                    status.as_u16()
                )),
                _ => EngineError::Internal(format!("HTTP error: {}", status.as_u16())),
            }
        } else {
            EngineError::Connection(format!("Network error: {}", err))
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Parse(format!("Failed to parse JSON payload: {}", err))
    }
}

impl From<rust_decimal::Error> for EngineError {
    fn from(err: rust_decimal::Error) -> Self {
        EngineError::Parse(format!("Failed to parse decimal field: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::Connection("down".into()).is_retryable());
        assert!(EngineError::RateLimit("429".into()).is_retryable());
        assert!(!EngineError::Parse("bad json".into()).is_retryable());
        assert!(!EngineError::Internal("bug".into()).is_retryable());
    }

    #[test]
    fn test_sync_errors_are_recoverable() {
        let gap = EngineError::Sync(SyncError::Gap {
            expected: 101,
            got: 105,
        });
        assert!(gap.is_recoverable());
        assert!(!gap.is_retryable());

        let config = EngineError::Config(ConfigError::CohortGap {
            whale_usd: 5_000.0,
            minnow_usd: 1_000.0,
        });
        assert!(!config.is_recoverable());
    }

    #[test]
    fn test_error_type_strings() {
        assert_eq!(
            EngineError::Sync(SyncError::Gap {
                expected: 1,
                got: 2
            })
            .error_type(),
            "sync_error"
        );
        assert_eq!(EngineError::RateLimit("x".into()).error_type(), "rate_limit");
    }
}
