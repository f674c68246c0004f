//! Δt-validated iceberg detector
//!
//! Invoked when a diff restores a pending candidate's price level to at
//! least its pre-trade visible volume. The filter chain rejects races and
//! slow refills on the trade-to-diff latency, scores the remainder with a
//! sigmoid, and requires a meaningful hidden remainder before a detection
//! is produced.

use crate::config::SymbolConfig;
use crate::iceberg::pending::PendingRefillCheck;
use crate::orderbook::Side;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::trace;

/// Diffs earlier than the trade by more than this are races, not refills (ms)
const RACE_TOLERANCE_MS: i64 = 20;

/// Sigmoid exponent clip for numeric stability
const SIGMOID_CLIP: f64 = 50.0;

/// Visible volume below this has no meaningful baseline
const MIN_VISIBLE_BASELINE: &str = "0.0001";

/// Confidence contribution of the hidden ratio is capped here
const MAX_RATIO_CONFIDENCE: f64 = 0.95;

/// A refill that survived every filter
#[derive(Debug, Clone)]
pub struct RefillDetection {
    /// Refilled price level
    pub price: Decimal,

    /// Ladder side of the refill (opposite the trade aggressor)
    pub side: Side,

    /// Hidden volume revealed by this refill (base asset)
    pub hidden_volume: Decimal,

    /// Visible quantity before the trade
    pub visible_before: Decimal,

    /// hidden / traded
    pub ratio: f64,

    /// Temporal refill probability from the sigmoid
    pub p_refill: f64,

    /// Base confidence before crypto-flow adjustment
    pub base_confidence: f64,

    /// Trade-to-diff latency in exchange time (ms)
    pub delta_t_ms: i64,
}

/// Detection parameters lifted from the symbol config
#[derive(Debug, Clone)]
pub struct IcebergDetector {
    max_refill_delay_ms: i64,
    refill_cutoff_ms: f64,
    refill_alpha: f64,
    min_p_refill: f64,
    min_hidden_qty: Decimal,
    min_ratio: f64,
    min_visible: Decimal,
}

impl IcebergDetector {
    /// Build a detector from the symbol configuration
    pub fn new(config: &SymbolConfig) -> Self {
        Self {
            max_refill_delay_ms: config.iceberg_max_refill_delay_ms,
            refill_cutoff_ms: config.iceberg_refill_cutoff_ms,
            refill_alpha: config.iceberg_refill_alpha,
            min_p_refill: config.iceberg_min_p_refill,
            min_hidden_qty: config.iceberg_min_hidden_qty,
            min_ratio: config.iceberg_min_ratio,
            min_visible: Decimal::from_str(MIN_VISIBLE_BASELINE)
                .expect("baseline constant must parse"),
        }
    }

    /// Temporal refill probability: `1 / (1 + exp(alpha * (dt - cutoff)))`
    ///
    /// The exponent is clipped to [-50, 50]; beyond that the sigmoid is
    /// saturated anyway and exp() would overflow to inf/0.
    pub fn refill_probability(&self, delta_t_ms: f64) -> f64 {
        let exponent =
            (self.refill_alpha * (delta_t_ms - self.refill_cutoff_ms)).clamp(-SIGMOID_CLIP, SIGMOID_CLIP);
        1.0 / (1.0 + exponent.exp())
    }

    /// Run the filter chain on a matched candidate
    ///
    /// `diff_event_time_ms` is the exchange event time of the restoring
    /// diff. Returns None when any filter rejects; order matters and is
    /// observable in the trace logs.
    pub fn evaluate(
        &self,
        check: &PendingRefillCheck,
        diff_event_time_ms: i64,
    ) -> Option<RefillDetection> {
        let delta_t_ms = diff_event_time_ms - check.trade_time_ms;

        // 1. Race: the "restoring" diff predates the trade beyond tolerance
        if delta_t_ms < -RACE_TOLERANCE_MS {
            trace!(delta_t_ms, "refill rejected: diff precedes trade");
            return None;
        }

        // 2. Too slow to be an automatic replenishment
        if delta_t_ms > self.max_refill_delay_ms {
            trace!(delta_t_ms, "refill rejected: beyond delay horizon");
            return None;
        }

        // 3-4. Temporal confidence
        let p_refill = self.refill_probability(delta_t_ms as f64);
        if p_refill < self.min_p_refill {
            trace!(p_refill, "refill rejected: insufficient temporal confidence");
            return None;
        }

        // 5. No meaningful visible baseline to reconcile against
        if check.visible_before < self.min_visible {
            trace!(visible = %check.visible_before, "refill rejected: no baseline");
            return None;
        }

        // 6. Nothing hidden: the visible quantity covered the trade
        if check.trade_qty <= check.visible_before {
            return None;
        }

        // 7. Hidden remainder must be material in absolute and relative terms
        let hidden = check.trade_qty - check.visible_before;
        let ratio = (hidden / check.trade_qty).to_f64().unwrap_or(0.0);
        if hidden < self.min_hidden_qty || ratio < self.min_ratio {
            trace!(hidden = %hidden, ratio, "refill rejected: immaterial remainder");
            return None;
        }

        let base_confidence = ratio.min(MAX_RATIO_CONFIDENCE) * p_refill;

        Some(RefillDetection {
            price: check.price,
            side: check.side,
            hidden_volume: hidden,
            visible_before: check.visible_before,
            ratio,
            p_refill,
            base_confidence,
            delta_t_ms,
        })
    }
}
