//! Active iceberg level state
//!
//! An `IcebergLevel` is created on first detection and mutated on every
//! accepted refill. Terminal transitions (breach, exhaustion, cancellation)
//! are owned by the registry; the level itself carries only scalar state and
//! the optional cancellation context (no back-pointers).

use crate::orderbook::Side;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Hidden-volume notional (USD) at or above which a level is whale-class
const WHALE_ICEBERG_USD: f64 = 100_000.0;

/// Hidden-volume notional (USD) at or above which a level is dolphin-class
const DOLPHIN_ICEBERG_USD: f64 = 10_000.0;

/// Lifecycle state of a tracked iceberg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IcebergStatus {
    /// Detected and still refilling
    Active,

    /// Volume fully absorbed without a refill inside the horizon
    Exhausted,

    /// Price traded through the level
    Breached,

    /// Visible remainder withdrawn before being filled, or confidence
    /// decayed below the floor
    Cancelled,
}

/// Scalar context captured at cancellation time
///
/// Feeds spoofing analysis downstream: a level that vanishes fast, with the
/// market moving away and little of it executed, looks like painted
/// liquidity rather than genuine supply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationContext {
    /// Mid price when the level was cancelled
    pub mid_price: Option<Decimal>,

    /// Mid drift velocity around cancellation (bps per second, signed)
    pub drift_bps_per_s: f64,

    /// Fraction of the estimated total that executed before cancellation
    pub executed_fraction: f64,
}

/// A detected hidden-liquidity level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcebergLevel {
    /// Price of the refilling level
    pub price: Decimal,

    /// Ladder side the level rests on
    pub side: Side,

    /// Cumulative hidden volume absorbed across refills (base asset)
    pub total_hidden_volume: Decimal,

    /// Number of accepted refills since detection
    pub refill_count: u32,

    /// Exchange time of first detection (ms)
    pub creation_time_ms: i64,

    /// Exchange time of the last accepted refill (ms)
    pub last_update_time_ms: i64,

    /// Lifecycle state
    pub status: IcebergStatus,

    /// Confidence at the last update. Consumers must go through
    /// `IcebergRegistry::decayed_confidence`; the raw score is stale the
    /// moment it is written.
    pub(in crate::iceberg) confidence_score: f64,

    /// Probability the level was painted rather than genuine (scored at
    /// cancellation, 0 while active)
    pub spoofing_probability: f64,

    /// Context captured when the level transitioned to Cancelled
    pub cancellation_context: Option<CancellationContext>,

    /// Volume executed at this price while tracked (base asset, cumulative)
    pub(in crate::iceberg) executed_total: Decimal,

    /// Volume executed since the last accepted refill; distinguishes
    /// exhaustion (traded away) from cancellation (pulled)
    pub(in crate::iceberg) executed_since_refill: Decimal,
}

impl IcebergLevel {
    /// Create a level from its first accepted refill
    pub fn new(
        price: Decimal,
        side: Side,
        hidden_volume: Decimal,
        confidence: f64,
        detection_time_ms: i64,
    ) -> Self {
        Self {
            price,
            side,
            total_hidden_volume: hidden_volume,
            refill_count: 1,
            creation_time_ms: detection_time_ms,
            last_update_time_ms: detection_time_ms,
            status: IcebergStatus::Active,
            confidence_score: confidence.clamp(0.0, 1.0),
            spoofing_probability: 0.0,
            cancellation_context: None,
            executed_total: Decimal::ZERO,
            executed_since_refill: Decimal::ZERO,
        }
    }

    /// Fold a subsequent refill into the level
    pub fn apply_refill(&mut self, hidden_volume: Decimal, confidence: f64, update_time_ms: i64) {
        self.total_hidden_volume += hidden_volume;
        self.refill_count += 1;
        self.last_update_time_ms = update_time_ms;
        self.confidence_score = confidence.clamp(0.0, 1.0);
        self.executed_since_refill = Decimal::ZERO;
    }

    /// Everything traded through this price while the level was tracked
    pub fn total_volume_absorbed(&self) -> Decimal {
        self.executed_total
    }

    /// Hidden-volume notional in quote currency
    pub fn hidden_notional(&self) -> f64 {
        (self.total_hidden_volume * self.price).to_f64().unwrap_or(0.0)
    }

    /// Whale-class: hidden notional >= $100k
    pub fn is_whale_iceberg(&self) -> bool {
        self.hidden_notional() >= WHALE_ICEBERG_USD
    }

    /// Dolphin-class: hidden notional in [$10k, $100k)
    pub fn is_dolphin_iceberg(&self) -> bool {
        let notional = self.hidden_notional();
        (DOLPHIN_ICEBERG_USD..WHALE_ICEBERG_USD).contains(&notional)
    }

    /// Seconds survived since first detection
    pub fn survival_seconds(&self, now_ms: i64) -> f64 {
        ((now_ms - self.creation_time_ms).max(0)) as f64 / 1000.0
    }
}
