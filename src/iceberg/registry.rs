//! Time-decayed iceberg registry
//!
//! Owns every tracked level for one symbol. Confidence is never read raw:
//! consumers get the exponentially decayed value, so a level that stopped
//! refilling fades instead of polluting downstream features. The periodic
//! sweep retires zombies (decay floor, TTL) and resolves disappeared levels
//! into Exhausted or Cancelled.

use crate::iceberg::detector::RefillDetection;
use crate::iceberg::level::{CancellationContext, IcebergLevel, IcebergStatus};
use crate::orderbook::{OrderBook, Side};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};

/// Decayed confidence below which a level is retired
const DECAY_FLOOR: f64 = 0.1;

/// Grace period after the last refill before an empty ladder level is
/// resolved (ms). Longer than the pending-queue retention: a refill still
/// in flight must not be misread as exhaustion.
const EXHAUST_GRACE_MS: i64 = 200;

/// Whether an accepted refill created or extended a level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    /// First detection at this price
    Detected,

    /// Existing active level refilled again
    Refilled,
}

/// A level leaving the ACTIVE state, ready for event emission
#[derive(Debug, Clone)]
pub struct IcebergTransition {
    /// The retired level, status already final
    pub level: IcebergLevel,

    /// Seconds between detection and the transition
    pub survival_seconds: f64,
}

/// Active iceberg map with time-decayed confidence
#[derive(Debug)]
pub struct IcebergRegistry {
    levels: HashMap<Decimal, IcebergLevel>,
    half_life_s: f64,
    max_ttl_s: f64,
}

impl IcebergRegistry {
    /// Create a registry with the configured decay profile
    pub fn new(half_life_s: f64, max_ttl_s: f64) -> Self {
        Self {
            levels: HashMap::new(),
            half_life_s,
            max_ttl_s,
        }
    }

    /// Number of tracked levels
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Iterate tracked levels (read-only)
    pub fn levels(&self) -> impl Iterator<Item = &IcebergLevel> {
        self.levels.values()
    }

    /// Multiplier applied to confidence after `elapsed_s` of silence
    ///
    /// `2^(-elapsed / half_life)`; composes multiplicatively, so
    /// `decay(dt1) * decay(dt2) == decay(dt1 + dt2)`.
    pub fn decay_multiplier(elapsed_s: f64, half_life_s: f64) -> f64 {
        (2.0_f64).powf(-(elapsed_s.max(0.0)) / half_life_s)
    }

    /// Decayed confidence of a level at `now_ms`, clamped to [0, 1]
    pub fn decayed_confidence(&self, level: &IcebergLevel, now_ms: i64) -> f64 {
        let elapsed_s = (now_ms - level.last_update_time_ms).max(0) as f64 / 1000.0;
        (level.confidence_score * Self::decay_multiplier(elapsed_s, self.half_life_s))
            .clamp(0.0, 1.0)
    }

    /// Decayed confidence for the level at `price`, if tracked
    pub fn confidence_at(&self, price: Decimal, now_ms: i64) -> Option<f64> {
        self.levels
            .get(&price)
            .map(|level| self.decayed_confidence(level, now_ms))
    }

    /// Upsert an accepted refill
    ///
    /// Creates the level on first detection; otherwise accumulates hidden
    /// volume and resets the decay clock. A stale level of the opposite
    /// side at the same price is replaced outright.
    pub fn upsert_refill(
        &mut self,
        detection: &RefillDetection,
        confidence: f64,
        update_time_ms: i64,
    ) -> (RefillOutcome, &IcebergLevel) {
        let trade_qty = detection.visible_before + detection.hidden_volume;

        let outcome = match self.levels.get_mut(&detection.price) {
            Some(level) if level.side == detection.side => {
                level.apply_refill(detection.hidden_volume, confidence, update_time_ms);
                level.executed_total += trade_qty;
                RefillOutcome::Refilled
            }
            _ => {
                let mut level = IcebergLevel::new(
                    detection.price,
                    detection.side,
                    detection.hidden_volume,
                    confidence,
                    update_time_ms,
                );
                level.executed_total = trade_qty;
                self.levels.insert(detection.price, level);
                RefillOutcome::Detected
            }
        };

        let level = &self.levels[&detection.price];
        debug!(
            price = %detection.price,
            refill_count = level.refill_count,
            hidden_total = %level.total_hidden_volume,
            ?outcome,
            "Registry refill upsert"
        );
        (outcome, level)
    }

    /// Record executed volume at a tracked price
    ///
    /// Called for every trade before the breach check; keeps the
    /// exhausted-vs-cancelled resolution honest.
    pub fn note_trade(&mut self, price: Decimal, quantity: Decimal) {
        if let Some(level) = self.levels.get_mut(&price) {
            level.executed_total += quantity;
            level.executed_since_refill += quantity;
        }
    }

    /// Mark levels traded through by a trade at `trade_price` as Breached
    ///
    /// An ask iceberg is breached by a trade strictly above its price, a bid
    /// iceberg by one strictly below: price discovered the other side of the
    /// wall, so the wall is gone.
    pub fn check_breaches(&mut self, trade_price: Decimal, now_ms: i64) -> Vec<IcebergTransition> {
        let breached: Vec<Decimal> = self
            .levels
            .iter()
            .filter(|(_, level)| match level.side {
                Side::Ask => trade_price > level.price,
                Side::Bid => trade_price < level.price,
            })
            .map(|(price, _)| *price)
            .collect();

        breached
            .into_iter()
            .filter_map(|price| self.levels.remove(&price))
            .map(|mut level| {
                info!(price = %level.price, side = ?level.side, "Iceberg breached");
                level.status = IcebergStatus::Breached;
                let survival_seconds = level.survival_seconds(now_ms);
                IcebergTransition {
                    level,
                    survival_seconds,
                }
            })
            .collect()
    }

    /// Periodic sweep: retire zombies and resolve disappeared levels
    ///
    /// `now_ms` is exchange time (latest observed event time). `mid` and
    /// `drift_bps_per_s` feed the cancellation context.
    pub fn sweep(
        &mut self,
        now_ms: i64,
        book: &OrderBook,
        mid: Option<Decimal>,
        drift_bps_per_s: f64,
    ) -> Vec<IcebergTransition> {
        let mut transitions = Vec::new();
        let prices: Vec<Decimal> = self.levels.keys().copied().collect();

        for price in prices {
            let level = &self.levels[&price];
            let age_s = (now_ms - level.creation_time_ms).max(0) as f64 / 1000.0;
            let decayed = self.decayed_confidence(level, now_ms);
            let visible = book.volume_at(price, level.side);

            let status = if age_s >= self.max_ttl_s {
                Some(IcebergStatus::Cancelled)
            } else if decayed < DECAY_FLOOR {
                Some(IcebergStatus::Cancelled)
            } else if visible.is_zero()
                && now_ms - level.last_update_time_ms > EXHAUST_GRACE_MS
            {
                if level.executed_since_refill > Decimal::ZERO {
                    Some(IcebergStatus::Exhausted)
                } else {
                    // Remainder pulled without trading: withdrawn, not eaten
                    Some(IcebergStatus::Cancelled)
                }
            } else {
                None
            };

            if let Some(status) = status {
                let mut level = self.levels.remove(&price).expect("level present");
                level.status = status;

                if status == IcebergStatus::Cancelled {
                    let executed_fraction = executed_fraction(&level, visible);
                    level.spoofing_probability = (1.0 - executed_fraction).clamp(0.0, 1.0);
                    level.cancellation_context = Some(CancellationContext {
                        mid_price: mid,
                        drift_bps_per_s,
                        executed_fraction,
                    });
                }

                info!(
                    price = %price,
                    ?status,
                    decayed_confidence = decayed,
                    age_s,
                    "Iceberg retired by sweep"
                );

                let survival_seconds = level.survival_seconds(now_ms);
                transitions.push(IcebergTransition {
                    level,
                    survival_seconds,
                });
            }
        }

        transitions
    }
}

/// Fraction of the level's known volume that executed before retirement
fn executed_fraction(level: &IcebergLevel, remaining_visible: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;

    let executed = level.total_volume_absorbed();
    let denominator = executed + remaining_visible;
    if denominator.is_zero() {
        return 0.0;
    }
    (executed / denominator).to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Side;
    use rust_decimal_macros::dec;

    fn detection(price: Decimal, side: Side) -> RefillDetection {
        RefillDetection {
            price,
            side,
            hidden_volume: dec!(0.4),
            visible_before: dec!(0.1),
            ratio: 0.8,
            p_refill: 0.85,
            base_confidence: 0.68,
            delta_t_ms: 18,
        }
    }

    fn registry() -> IcebergRegistry {
        IcebergRegistry::new(300.0, 3600.0)
    }

    #[test]
    fn test_upsert_detect_then_refill() {
        let mut reg = registry();
        let (outcome, _) = reg.upsert_refill(&detection(dec!(100000), Side::Ask), 0.68, 1_000);
        assert_eq!(outcome, RefillOutcome::Detected);

        let (outcome, level) = reg.upsert_refill(&detection(dec!(100000), Side::Ask), 0.72, 2_000);
        assert_eq!(outcome, RefillOutcome::Refilled);
        assert_eq!(level.refill_count, 2);
        assert_eq!(level.total_hidden_volume, dec!(0.8));
    }

    #[test]
    fn test_zombie_decay() {
        // Detected with confidence 0.9, silent for 600s, half-life 300s
        let mut reg = registry();
        reg.upsert_refill(&detection(dec!(100000), Side::Ask), 0.9, 0);

        let decayed = reg.confidence_at(dec!(100000), 600_000).unwrap();
        assert!((decayed - 0.225).abs() < 1e-9);
    }

    #[test]
    fn test_decay_is_monotonic_and_composes() {
        let m1 = IcebergRegistry::decay_multiplier(120.0, 300.0);
        let m2 = IcebergRegistry::decay_multiplier(480.0, 300.0);
        let total = IcebergRegistry::decay_multiplier(600.0, 300.0);

        assert!(m1 > m2);
        assert!((m1 * m2 - total).abs() < 1e-12);

        // Non-increasing over a fine grid
        let mut last = f64::INFINITY;
        for step in 0..100 {
            let m = IcebergRegistry::decay_multiplier(step as f64 * 7.3, 300.0);
            assert!(m <= last);
            last = m;
        }
    }

    #[test]
    fn test_breach_by_side() {
        let mut reg = registry();
        reg.upsert_refill(&detection(dec!(100000), Side::Ask), 0.7, 0);
        reg.upsert_refill(&detection(dec!(99000), Side::Bid), 0.7, 0);

        // Trade above the ask level breaches it, leaves the bid intact
        let transitions = reg.check_breaches(dec!(100500), 10_000);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].level.status, IcebergStatus::Breached);
        assert_eq!(transitions[0].level.price, dec!(100000));
        assert_eq!(reg.len(), 1);

        // Trade exactly at the bid level is not a breach
        assert!(reg.check_breaches(dec!(99000), 11_000).is_empty());

        // Trade below it is
        let transitions = reg.check_breaches(dec!(98999), 12_000);
        assert_eq!(transitions.len(), 1);
        assert!((transitions[0].survival_seconds - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_sweep_cancels_on_decay_floor() {
        let mut reg = registry();
        reg.upsert_refill(&detection(dec!(100000), Side::Ask), 0.9, 0);

        let mut book = OrderBook::new("BTCUSDT");
        book.apply_level(Side::Ask, dec!(100000), dec!(0.1));

        // ~1000s: 0.9 * 2^(-1000/300) ~ 0.089 < 0.1
        let transitions = reg.sweep(1_000_000, &book, Some(dec!(99990)), -0.5);
        assert_eq!(transitions.len(), 1);
        let level = &transitions[0].level;
        assert_eq!(level.status, IcebergStatus::Cancelled);
        let ctx = level.cancellation_context.as_ref().unwrap();
        assert_eq!(ctx.mid_price, Some(dec!(99990)));
        assert!(ctx.executed_fraction > 0.0);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_sweep_ttl_cap() {
        let mut reg = IcebergRegistry::new(1e9, 3600.0); // decay effectively off
        reg.upsert_refill(&detection(dec!(100000), Side::Ask), 0.9, 0);

        // Level still visible on the ladder, so only the TTL can retire it
        let mut book = OrderBook::new("BTCUSDT");
        book.apply_level(Side::Ask, dec!(100000), dec!(0.1));

        assert!(reg.sweep(3_599_000, &book, None, 0.0).is_empty());

        let transitions = reg.sweep(3_600_000, &book, None, 0.0);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].level.status, IcebergStatus::Cancelled);
    }

    #[test]
    fn test_sweep_resolves_disappeared_level() {
        let mut reg = registry();
        let book = OrderBook::new("BTCUSDT"); // level absent from ladder

        // Executed since refill -> exhausted
        reg.upsert_refill(&detection(dec!(100000), Side::Ask), 0.9, 0);
        reg.note_trade(dec!(100000), dec!(0.3));
        let transitions = reg.sweep(1_000, &book, None, 0.0);
        assert_eq!(transitions[0].level.status, IcebergStatus::Exhausted);

        // Untouched since refill -> cancelled (pulled)
        reg.upsert_refill(&detection(dec!(100001), Side::Ask), 0.9, 0);
        let transitions = reg.sweep(1_000, &book, None, 0.0);
        assert_eq!(transitions[0].level.status, IcebergStatus::Cancelled);
    }

    #[test]
    fn test_sweep_waits_for_grace_period() {
        let mut reg = registry();
        let book = OrderBook::new("BTCUSDT");

        reg.upsert_refill(&detection(dec!(100000), Side::Ask), 0.9, 1_000);
        reg.note_trade(dec!(100000), dec!(0.2));

        // 150ms after the refill: a follow-up refill may still be in flight
        assert!(reg.sweep(1_150, &book, None, 0.0).is_empty());
        assert_eq!(reg.len(), 1);

        // Past the grace period it resolves
        assert_eq!(reg.sweep(1_300, &book, None, 0.0).len(), 1);
    }

    #[test]
    fn test_opposite_side_replaces_stale_level() {
        let mut reg = registry();
        reg.upsert_refill(&detection(dec!(100000), Side::Ask), 0.7, 0);

        let (outcome, level) =
            reg.upsert_refill(&detection(dec!(100000), Side::Bid), 0.7, 5_000);
        assert_eq!(outcome, RefillOutcome::Detected);
        assert_eq!(level.side, Side::Bid);
        assert_eq!(level.refill_count, 1);
    }
}
