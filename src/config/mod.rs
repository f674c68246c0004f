//! Configuration Management
//!
//! Per-symbol detection parameters and engine-level settings. All thresholds
//! are validated at construction; a configuration that violates the cohort
//! gap invariant (whale >= 10 x minnow) or carries non-positive limits is
//! rejected before any market data flows.

use crate::error::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Exchange symbol format: uppercase alphanumeric, no separators
static SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{5,20}$").expect("symbol regex must compile"));

/// Default Binance REST base URL
const DEFAULT_REST_URL: &str = "https://api.binance.com";

/// Default Binance WebSocket stream base URL
const DEFAULT_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// Per-symbol detection parameters
///
/// Defaults follow the BTC swing profile; scalping and positional profiles
/// override the decay half-life (30-60s / 3600s respectively).
#[derive(Debug, Clone)]
pub struct SymbolConfig {
    /// Trading pair symbol (uppercase, e.g. "BTCUSDT")
    pub symbol: String,

    /// Quote-volume floor for the whale cohort (USD)
    pub whale_threshold_usd: f64,

    /// Quote-volume ceiling for the minnow cohort (USD, inclusive)
    pub minnow_threshold_usd: f64,

    /// Recompute cohort thresholds from rolling trade-size percentiles
    pub dynamic_thresholds: bool,

    /// Hard floor for the dynamic minnow threshold (USD)
    pub minnow_floor_usd: f64,

    /// Reject refills observed later than this after the trade (ms)
    pub iceberg_max_refill_delay_ms: i64,

    /// Sigmoid midpoint for refill probability (ms)
    pub iceberg_refill_cutoff_ms: f64,

    /// Sigmoid steepness for refill probability
    pub iceberg_refill_alpha: f64,

    /// Minimum temporal confidence required to accept a refill
    pub iceberg_min_p_refill: f64,

    /// Minimum hidden quantity (base asset) for a detection
    pub iceberg_min_hidden_qty: Decimal,

    /// Minimum hidden/traded ratio for a detection
    pub iceberg_min_ratio: f64,

    /// Confidence decay half-life (seconds)
    pub iceberg_decay_half_life_s: f64,

    /// Hard TTL for registry entries regardless of decay (seconds)
    pub iceberg_max_ttl_s: f64,

    /// Fixed quote-volume size of a VPIN bucket (USD)
    pub vpin_bucket_size_usd: f64,

    /// Closed buckets required before VPIN is considered reliable
    pub vpin_min_buckets: usize,

    /// Mean |imbalance| ratio below which VPIN is suppressed as flat-market noise
    pub vpin_flat_threshold: f64,

    /// Trades retained in the algo classification window
    pub algo_window_size: usize,

    /// Directional ratio required to attempt classification
    pub algo_directional_threshold: f64,

    /// Exponential depth-weight decay for the order book imbalance
    pub obi_lambda: f64,
}

impl SymbolConfig {
    /// Create a config with profile defaults for the given symbol
    ///
    /// Returns `ConfigError::InvalidSymbol` for malformed symbols.
    pub fn new(symbol: &str) -> Result<Self, ConfigError> {
        let symbol = symbol.to_uppercase();
        if !SYMBOL_RE.is_match(&symbol) {
            return Err(ConfigError::InvalidSymbol(symbol));
        }

        Ok(Self {
            symbol,
            whale_threshold_usd: 100_000.0,
            minnow_threshold_usd: 1_000.0,
            dynamic_thresholds: false,
            minnow_floor_usd: 100.0,
            iceberg_max_refill_delay_ms: 50,
            iceberg_refill_cutoff_ms: 30.0,
            iceberg_refill_alpha: 0.15,
            iceberg_min_p_refill: 0.6,
            iceberg_min_hidden_qty: Decimal::new(5, 2), // 0.05
            iceberg_min_ratio: 0.3,
            iceberg_decay_half_life_s: 300.0,
            iceberg_max_ttl_s: 3600.0,
            vpin_bucket_size_usd: 250_000.0,
            vpin_min_buckets: 10,
            vpin_flat_threshold: 0.05,
            algo_window_size: 200,
            algo_directional_threshold: 0.85,
            obi_lambda: 0.5,
        })
    }

    /// Validate invariants across all thresholds
    ///
    /// Called by `EngineConfig` after construction and after any override.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("whale_threshold_usd", self.whale_threshold_usd),
            ("minnow_threshold_usd", self.minnow_threshold_usd),
            ("minnow_floor_usd", self.minnow_floor_usd),
            ("iceberg_refill_alpha", self.iceberg_refill_alpha),
            ("iceberg_decay_half_life_s", self.iceberg_decay_half_life_s),
            ("iceberg_max_ttl_s", self.iceberg_max_ttl_s),
            ("vpin_bucket_size_usd", self.vpin_bucket_size_usd),
            ("obi_lambda", self.obi_lambda),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if self.iceberg_max_refill_delay_ms <= 0 {
            return Err(ConfigError::NonPositive {
                name: "iceberg_max_refill_delay_ms",
                value: self.iceberg_max_refill_delay_ms as f64,
            });
        }

        if self.whale_threshold_usd < 10.0 * self.minnow_threshold_usd {
            return Err(ConfigError::CohortGap {
                whale_usd: self.whale_threshold_usd,
                minnow_usd: self.minnow_threshold_usd,
            });
        }

        if self.iceberg_refill_cutoff_ms > self.iceberg_max_refill_delay_ms as f64 {
            return Err(ConfigError::Contradictory(format!(
                "refill cutoff {}ms beyond rejection horizon {}ms",
                self.iceberg_refill_cutoff_ms, self.iceberg_max_refill_delay_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.iceberg_min_p_refill)
            || !(0.0..=1.0).contains(&self.iceberg_min_ratio)
            || !(0.0..=1.0).contains(&self.vpin_flat_threshold)
            || !(0.0..=1.0).contains(&self.algo_directional_threshold)
        {
            return Err(ConfigError::Contradictory(
                "probability thresholds must lie in [0, 1]".to_string(),
            ));
        }

        if self.algo_window_size < 2 {
            return Err(ConfigError::Contradictory(
                "algo_window_size must be at least 2".to_string(),
            ));
        }

        Ok(())
    }
}

/// Engine-level configuration shared by all symbol tasks (read-only)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-symbol configurations
    pub symbols: Vec<SymbolConfig>,

    /// Exchange REST base URL (snapshots)
    pub rest_url: String,

    /// Exchange WebSocket base URL (diff + trade streams)
    pub ws_url: String,

    /// Depth levels requested per REST snapshot
    pub snapshot_depth: usize,

    /// Registry sweep / pending GC cadence (seconds)
    pub cleanup_interval_s: u64,

    /// Derivatives cache refresh cadence (seconds)
    pub derivatives_refresh_s: u64,

    /// Deribit-style derivatives REST base URL; absent disables the cache
    pub derivatives_url: Option<String>,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// - `MSE_SYMBOLS`: comma-separated pairs (default "BTCUSDT")
    /// - `MSE_REST_URL` / `MSE_WS_URL`: exchange endpoints
    /// - `MSE_SNAPSHOT_DEPTH`: REST snapshot depth (default 1000)
    /// - `MSE_CLEANUP_INTERVAL_S`: registry sweep cadence (default 5)
    /// - `MSE_DERIVATIVES_URL`: optional derivatives endpoint
    /// - `MSE_DECAY_HALF_LIFE_S`: strategy decay profile override
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_symbols =
            env::var("MSE_SYMBOLS").unwrap_or_else(|_| "BTCUSDT".to_string());

        let half_life = parse_env_f64("MSE_DECAY_HALF_LIFE_S")?;

        let mut symbols = Vec::new();
        for part in raw_symbols.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let mut cfg = SymbolConfig::new(part)?;
            if let Some(hl) = half_life {
                cfg.iceberg_decay_half_life_s = hl;
            }
            cfg.validate()?;
            symbols.push(cfg);
        }

        if symbols.is_empty() {
            return Err(ConfigError::Contradictory(
                "MSE_SYMBOLS resolved to an empty symbol list".to_string(),
            ));
        }

        Ok(Self {
            symbols,
            rest_url: env::var("MSE_REST_URL").unwrap_or_else(|_| DEFAULT_REST_URL.to_string()),
            ws_url: env::var("MSE_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string()),
            snapshot_depth: parse_env_usize("MSE_SNAPSHOT_DEPTH")?.unwrap_or(1000),
            cleanup_interval_s: parse_env_u64("MSE_CLEANUP_INTERVAL_S")?.unwrap_or(5),
            derivatives_refresh_s: parse_env_u64("MSE_DERIVATIVES_REFRESH_S")?.unwrap_or(60),
            derivatives_url: env::var("MSE_DERIVATIVES_URL").ok(),
        })
    }
}

fn parse_env_f64(name: &str) -> Result<Option<f64>, ConfigError> {
    match env::var(name) {
        Ok(raw) => f64::from_str(&raw)
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

fn parse_env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(raw) => u64::from_str(&raw)
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

fn parse_env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(name) {
        Ok(raw) => usize::from_str(&raw)
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_pass_validation() {
        let cfg = SymbolConfig::new("BTCUSDT").unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.symbol, "BTCUSDT");
    }

    #[test]
    fn test_symbol_format_rejected() {
        assert!(SymbolConfig::new("BTC-USDT").is_err());
        assert!(SymbolConfig::new("btc usdt").is_err());
        assert!(SymbolConfig::new("BT").is_err());
        // Lowercase input is normalized, not rejected
        assert!(SymbolConfig::new("ethusdt").is_ok());
    }

    #[test]
    fn test_cohort_gap_enforced() {
        let mut cfg = SymbolConfig::new("BTCUSDT").unwrap();
        cfg.whale_threshold_usd = 9_000.0;
        cfg.minnow_threshold_usd = 1_000.0;
        match cfg.validate() {
            Err(ConfigError::CohortGap { .. }) => {}
            other => panic!("expected CohortGap, got {:?}", other),
        }

        // Exactly 10x is allowed
        cfg.whale_threshold_usd = 10_000.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_non_positive_threshold_rejected() {
        let mut cfg = SymbolConfig::new("BTCUSDT").unwrap();
        cfg.vpin_bucket_size_usd = 0.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NonPositive { name: "vpin_bucket_size_usd", .. })
        ));
    }

    #[test]
    fn test_cutoff_beyond_horizon_rejected() {
        let mut cfg = SymbolConfig::new("BTCUSDT").unwrap();
        cfg.iceberg_refill_cutoff_ms = 80.0;
        cfg.iceberg_max_refill_delay_ms = 50;
        assert!(matches!(cfg.validate(), Err(ConfigError::Contradictory(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        env::remove_var("MSE_SYMBOLS");
        env::remove_var("MSE_DECAY_HALF_LIFE_S");
        let cfg = EngineConfig::from_env().unwrap();
        assert_eq!(cfg.symbols.len(), 1);
        assert_eq!(cfg.symbols[0].symbol, "BTCUSDT");
        assert_eq!(cfg.snapshot_depth, 1000);
        assert!(cfg.derivatives_url.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_symbol_list_and_profile() {
        env::set_var("MSE_SYMBOLS", "btcusdt, ETHUSDT");
        env::set_var("MSE_DECAY_HALF_LIFE_S", "60");
        let cfg = EngineConfig::from_env().unwrap();
        assert_eq!(cfg.symbols.len(), 2);
        assert_eq!(cfg.symbols[0].symbol, "BTCUSDT");
        assert_eq!(cfg.symbols[1].symbol, "ETHUSDT");
        assert_eq!(cfg.symbols[1].iceberg_decay_half_life_s, 60.0);
        env::remove_var("MSE_SYMBOLS");
        env::remove_var("MSE_DECAY_HALF_LIFE_S");
    }
}
