//! Crypto-aware refill confidence adjustment
//!
//! High flow toxicity near a refill is ambiguous in crypto: it can be an
//! institutional attack grinding the level down, or retail panic being
//! absorbed by it. The cohort mix disambiguates. Adjustments are
//! multiplicative on the detector's base confidence and the result is
//! clamped to [0, 1].

use tracing::debug;

/// VPIN below this: flow is not toxic enough to say anything
const VPIN_EXIT: f64 = 0.5;

/// Cohort share above which one cohort dominates the flow
const DOMINANT_PCT: f64 = 0.6;

/// Whale attack: dominant whale flow with VPIN above this
const WHALE_ATTACK_VPIN: f64 = 0.7;

/// Panic absorption: dominant minnow flow with VPIN above this
const PANIC_VPIN: f64 = 0.8;

/// Mixed toxic flow threshold
const MIXED_VPIN: f64 = 0.6;

/// Confidence haircut under institutional attack
const WHALE_ATTACK_PENALTY: f64 = 0.25;

/// Confidence bonus for absorbing retail liquidations
const PANIC_BONUS: f64 = 0.10;

/// Conservative haircut for toxic but unattributed flow
const MIXED_PENALTY: f64 = 0.05;

/// Opposing-drift penalty saturates at 10%
const MAX_DRIFT_PENALTY: f64 = 0.10;

/// Flow conditions observed at refill time
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    /// Flow toxicity at the refill; absent when the VPIN gate is closed
    pub vpin: Option<f64>,

    /// Whale share of recent aggressor volume
    pub whale_volume_pct: f64,

    /// Minnow share of recent aggressor volume
    pub minnow_volume_pct: f64,

    /// Magnitude of the mid drift since the trade (bps)
    pub price_drift_bps: f64,

    /// True when the drift pushes into the iceberg's wall
    pub drift_opposes: bool,
}

/// Adjusts detector confidence for crypto flow conditions
#[derive(Debug, Clone, Copy, Default)]
pub struct RefillConfidenceAdjuster;

impl RefillConfidenceAdjuster {
    /// Create an adjuster
    pub fn new() -> Self {
        Self
    }

    /// Apply cohort-aware adjustment to a base confidence
    ///
    /// The whale and minnow shares must leave a non-negative dolphin
    /// remainder; that is an upstream accounting invariant, not a market
    /// condition.
    pub fn adjust(&self, base_confidence: f64, ctx: &FlowContext) -> f64 {
        debug_assert!(
            ctx.whale_volume_pct + ctx.minnow_volume_pct <= 1.0 + 1e-9,
            "cohort shares exceed 1: whale {} + minnow {}",
            ctx.whale_volume_pct,
            ctx.minnow_volume_pct
        );

        let vpin = match ctx.vpin {
            Some(v) if v >= VPIN_EXIT => v,
            // Gate closed or flow non-toxic: detector confidence stands
            _ => return base_confidence.clamp(0.0, 1.0),
        };

        let mut adjusted = base_confidence;

        if ctx.whale_volume_pct > DOMINANT_PCT && vpin > WHALE_ATTACK_VPIN {
            // Institutional flow grinding the level down: likelier to fail
            adjusted *= 1.0 - WHALE_ATTACK_PENALTY;
            debug!(vpin, whale_pct = ctx.whale_volume_pct, "whale attack haircut");
        } else if ctx.minnow_volume_pct > DOMINANT_PCT && vpin > PANIC_VPIN {
            // A stable level soaking retail liquidations is the strongest
            // accumulation signal
            adjusted *= 1.0 + PANIC_BONUS;
            debug!(vpin, minnow_pct = ctx.minnow_volume_pct, "panic absorption bonus");
        } else if ctx.whale_volume_pct <= DOMINANT_PCT
            && ctx.minnow_volume_pct <= DOMINANT_PCT
            && vpin > MIXED_VPIN
        {
            // Toxic flow nobody owns; a dominant cohort below its own
            // toxicity threshold passes through unadjusted instead
            adjusted *= 1.0 - MIXED_PENALTY;
        }

        if ctx.drift_opposes {
            adjusted *= 1.0 - (ctx.price_drift_bps / 100.0).min(MAX_DRIFT_PENALTY);
        }

        adjusted.clamp(0.0, 1.0)
    }
}
