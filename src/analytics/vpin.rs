//! Flow toxicity (VPIN)
//!
//! Volume-synchronized probability of informed trading. Trades fill
//! fixed-notional buckets with signed buy/sell volume; a full bucket closes
//! and its |buy - sell| / size imbalance enters the rolling VPIN mean.
//!
//! The reliability gate suppresses the signal in flat markets: with too few
//! closed buckets or near-zero imbalance everywhere, `current_vpin` returns
//! absence rather than a noisy number.

use std::collections::VecDeque;

/// Closed buckets retained for the VPIN mean
const MAX_BUCKETS: usize = 50;

/// A fixed-notional volume bucket
#[derive(Debug, Clone, Copy, Default)]
struct VolumeBucket {
    buy_volume: f64,
    sell_volume: f64,
}

impl VolumeBucket {
    fn total(&self) -> f64 {
        self.buy_volume + self.sell_volume
    }

    /// |buy - sell| normalized by the nominal bucket size
    fn imbalance_ratio(&self, bucket_size: f64) -> f64 {
        (self.buy_volume - self.sell_volume).abs() / bucket_size
    }
}

/// VPIN calculator over fixed quote-volume buckets
#[derive(Debug)]
pub struct FlowToxicityAnalyzer {
    bucket_size_usd: f64,
    min_buckets: usize,
    flat_threshold: f64,
    open: VolumeBucket,
    closed: VecDeque<VolumeBucket>,
}

impl FlowToxicityAnalyzer {
    /// Create an analyzer with the configured bucket size and gate
    pub fn new(bucket_size_usd: f64, min_buckets: usize, flat_threshold: f64) -> Self {
        Self {
            bucket_size_usd,
            min_buckets,
            flat_threshold,
            open: VolumeBucket::default(),
            closed: VecDeque::with_capacity(MAX_BUCKETS),
        }
    }

    /// Closed bucket count
    pub fn bucket_count(&self) -> usize {
        self.closed.len()
    }

    /// Add one trade's signed notional, closing buckets as they fill
    ///
    /// A trade larger than the remaining bucket capacity spills into the
    /// next bucket so every closed bucket holds exactly the nominal size.
    pub fn on_trade(&mut self, notional_usd: f64, is_buy: bool) {
        let mut remaining = notional_usd.max(0.0);

        while remaining > 0.0 {
            let capacity = self.bucket_size_usd - self.open.total();
            let fill = remaining.min(capacity);

            if is_buy {
                self.open.buy_volume += fill;
            } else {
                self.open.sell_volume += fill;
            }
            remaining -= fill;

            if self.open.total() >= self.bucket_size_usd {
                if self.closed.len() == MAX_BUCKETS {
                    self.closed.pop_front();
                }
                self.closed.push_back(self.open);
                self.open = VolumeBucket::default();
            }
        }
    }

    /// Whether the VPIN reading is trustworthy
    ///
    /// Requires enough closed buckets and a mean |imbalance| above the
    /// flat-market floor.
    pub fn is_reliable(&self) -> bool {
        if self.closed.len() < self.min_buckets {
            return false;
        }
        self.mean_imbalance_ratio() >= self.flat_threshold
    }

    /// Current VPIN in [0, 1], absent when the gate is closed
    pub fn current_vpin(&self) -> Option<f64> {
        if !self.is_reliable() {
            return None;
        }
        Some(self.mean_imbalance_ratio())
    }

    fn mean_imbalance_ratio(&self) -> f64 {
        if self.closed.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .closed
            .iter()
            .map(|bucket| bucket.imbalance_ratio(self.bucket_size_usd))
            .sum();
        sum / self.closed.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_closes_at_size() {
        let mut vpin = FlowToxicityAnalyzer::new(1_000.0, 10, 0.05);
        vpin.on_trade(600.0, true);
        assert_eq!(vpin.bucket_count(), 0);

        vpin.on_trade(400.0, false);
        assert_eq!(vpin.bucket_count(), 1);
    }

    #[test]
    fn test_oversized_trade_spills_into_next_bucket() {
        let mut vpin = FlowToxicityAnalyzer::new(1_000.0, 1, 0.0);
        vpin.on_trade(2_500.0, true);
        // Two full buckets closed, 500 left in the open bucket
        assert_eq!(vpin.bucket_count(), 2);
        assert!((vpin.open.buy_volume - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_unreliable_below_min_buckets() {
        let mut vpin = FlowToxicityAnalyzer::new(1_000.0, 10, 0.05);
        for _ in 0..9 {
            vpin.on_trade(1_000.0, true);
        }
        assert_eq!(vpin.bucket_count(), 9);
        assert!(!vpin.is_reliable());
        assert!(vpin.current_vpin().is_none());
    }

    #[test]
    fn test_flat_market_suppressed() {
        let mut vpin = FlowToxicityAnalyzer::new(1_000.0, 10, 0.05);
        // Perfectly balanced buckets: imbalance 0 everywhere
        for _ in 0..12 {
            vpin.on_trade(500.0, true);
            vpin.on_trade(500.0, false);
        }
        assert!(vpin.bucket_count() >= 10);
        assert!(vpin.current_vpin().is_none());
    }

    #[test]
    fn test_one_sided_flow_reads_high() {
        let mut vpin = FlowToxicityAnalyzer::new(1_000.0, 10, 0.05);
        for _ in 0..12 {
            vpin.on_trade(1_000.0, true);
        }
        let value = vpin.current_vpin().unwrap();
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_mixed_flow_mid_range() {
        let mut vpin = FlowToxicityAnalyzer::new(1_000.0, 10, 0.05);
        for _ in 0..12 {
            vpin.on_trade(750.0, true);
            vpin.on_trade(250.0, false);
        }
        let value = vpin.current_vpin().unwrap();
        assert!((value - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_window_caps_buckets() {
        let mut vpin = FlowToxicityAnalyzer::new(100.0, 10, 0.0);
        for _ in 0..80 {
            vpin.on_trade(100.0, true);
        }
        assert_eq!(vpin.bucket_count(), MAX_BUCKETS);
    }
}
