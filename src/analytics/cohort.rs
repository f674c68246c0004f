//! Trade-size cohort segmentation and CVD tracking
//!
//! Partitions aggressor flow into whale / dolphin / minnow cohorts by
//! quote-currency notional and accumulates signed volume (CVD) per cohort.
//! The rolling 60-second cohort mix feeds the refill confidence adjuster.
//!
//! The minnow boundary is inclusive: a trade exactly at the threshold is
//! retail-sized, not mid-tier. The whale threshold must sit at least 10x
//! above the minnow threshold, including after any dynamic recompute.

use crate::config::SymbolConfig;
use crate::events::Cohort;
use statrs::statistics::{Data, OrderStatistics};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Rolling window for the cohort mix (ms)
const MIX_WINDOW_MS: i64 = 60_000;

/// Trade-size samples retained for dynamic threshold recomputation
const MAX_SAMPLES: usize = 512;

/// Samples required before the first dynamic recompute
const MIN_SAMPLES: usize = 100;

/// Dynamic recompute cadence (trades)
const RECOMPUTE_EVERY: usize = 64;

/// Cohort shares of recent aggressor volume; sums to 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CohortMix {
    /// Whale share of notional in the window
    pub whale_pct: f64,

    /// Dolphin share of notional in the window
    pub dolphin_pct: f64,

    /// Minnow share of notional in the window
    pub minnow_pct: f64,
}

/// Result of classifying one trade
#[derive(Debug, Clone, Copy)]
pub struct CohortUpdate {
    /// Cohort the trade falls into
    pub cohort: Cohort,

    /// Signed quote volume added to the cohort's CVD
    pub cvd_delta: f64,

    /// Cohort CVD after the update
    pub cvd_after: f64,

    /// Trade notional in quote currency
    pub notional_usd: f64,
}

/// Cohort segmentation, CVD accounting and dynamic thresholds for one symbol
#[derive(Debug)]
pub struct WhaleCohortAnalyzer {
    whale_usd: f64,
    minnow_usd: f64,
    dynamic: bool,
    minnow_floor_usd: f64,
    cvd: HashMap<Cohort, f64>,
    recent: VecDeque<(i64, Cohort, f64)>,
    samples: VecDeque<f64>,
    trades_since_recompute: usize,
}

impl WhaleCohortAnalyzer {
    /// Build an analyzer from a validated symbol configuration
    pub fn new(config: &SymbolConfig) -> Self {
        Self {
            whale_usd: config.whale_threshold_usd,
            minnow_usd: config.minnow_threshold_usd,
            dynamic: config.dynamic_thresholds,
            minnow_floor_usd: config.minnow_floor_usd,
            cvd: HashMap::from([
                (Cohort::Whale, 0.0),
                (Cohort::Dolphin, 0.0),
                (Cohort::Minnow, 0.0),
            ]),
            recent: VecDeque::new(),
            samples: VecDeque::with_capacity(MAX_SAMPLES),
            trades_since_recompute: 0,
        }
    }

    /// Current whale threshold (static or last recomputed)
    pub fn whale_threshold_usd(&self) -> f64 {
        self.whale_usd
    }

    /// Current minnow threshold (static or last recomputed)
    pub fn minnow_threshold_usd(&self) -> f64 {
        self.minnow_usd
    }

    /// Classify a trade by quote notional
    ///
    /// Exactly one cohort per trade; the minnow boundary is inclusive.
    pub fn classify(&self, notional_usd: f64) -> Cohort {
        if notional_usd >= self.whale_usd {
            Cohort::Whale
        } else if notional_usd <= self.minnow_usd {
            Cohort::Minnow
        } else {
            Cohort::Dolphin
        }
    }

    /// Account one trade: classify, update CVD, roll the mix window
    ///
    /// `is_buyer_maker == false` is aggressive buying (+CVD).
    pub fn on_trade(&mut self, notional_usd: f64, is_buyer_maker: bool, event_time_ms: i64) -> CohortUpdate {
        let cohort = self.classify(notional_usd);
        let cvd_delta = if is_buyer_maker {
            -notional_usd
        } else {
            notional_usd
        };

        let entry = self.cvd.entry(cohort).or_insert(0.0);
        *entry += cvd_delta;
        let cvd_after = *entry;

        self.recent.push_back((event_time_ms, cohort, notional_usd));
        self.prune(event_time_ms);

        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(notional_usd);

        if self.dynamic {
            self.trades_since_recompute += 1;
            if self.trades_since_recompute >= RECOMPUTE_EVERY && self.samples.len() >= MIN_SAMPLES {
                self.recompute_thresholds();
                self.trades_since_recompute = 0;
            }
        }

        CohortUpdate {
            cohort,
            cvd_delta,
            cvd_after,
            notional_usd,
        }
    }

    /// Cumulative signed quote volume for a cohort
    pub fn cvd(&self, cohort: Cohort) -> f64 {
        self.cvd.get(&cohort).copied().unwrap_or(0.0)
    }

    /// Cohort shares of aggressor notional over the rolling window
    ///
    /// Returns None when the window is empty (absence, not zeros).
    pub fn cohort_mix(&mut self, now_ms: i64) -> Option<CohortMix> {
        self.prune(now_ms);
        if self.recent.is_empty() {
            return None;
        }

        let mut whale = 0.0;
        let mut dolphin = 0.0;
        let mut minnow = 0.0;
        for (_, cohort, notional) in &self.recent {
            match cohort {
                Cohort::Whale => whale += notional,
                Cohort::Dolphin => dolphin += notional,
                Cohort::Minnow => minnow += notional,
            }
        }

        let total = whale + dolphin + minnow;
        if total <= 0.0 {
            return None;
        }

        Some(CohortMix {
            whale_pct: whale / total,
            dolphin_pct: dolphin / total,
            minnow_pct: minnow / total,
        })
    }

    /// Drop mix entries older than the rolling window
    fn prune(&mut self, now_ms: i64) {
        while let Some((time, _, _)) = self.recent.front() {
            if now_ms - time > MIX_WINDOW_MS {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Percentile-based threshold recompute (p20 / p95) with hard floors
    ///
    /// The 10x gap invariant survives recomputation by construction: the
    /// whale threshold is floored at 10x the recomputed minnow threshold.
    fn recompute_thresholds(&mut self) {
        let mut data = Data::new(self.samples.iter().copied().collect::<Vec<f64>>());

        let p20 = data.percentile(20);
        let p95 = data.percentile(95);

        self.minnow_usd = p20.max(self.minnow_floor_usd);
        self.whale_usd = p95.max(10.0 * self.minnow_usd);

        debug!(
            minnow_usd = self.minnow_usd,
            whale_usd = self.whale_usd,
            samples = self.samples.len(),
            "Recomputed dynamic cohort thresholds"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> WhaleCohortAnalyzer {
        WhaleCohortAnalyzer::new(&SymbolConfig::new("BTCUSDT").unwrap())
    }

    #[test]
    fn test_classification_boundaries() {
        let a = analyzer();
        // Inclusive minnow boundary: exactly $1k classifies as minnow
        assert_eq!(a.classify(1_000.0), Cohort::Minnow);
        assert_eq!(a.classify(1_000.01), Cohort::Dolphin);
        assert_eq!(a.classify(99_999.99), Cohort::Dolphin);
        // Whale boundary is inclusive from above
        assert_eq!(a.classify(100_000.0), Cohort::Whale);
        assert_eq!(a.classify(5.0), Cohort::Minnow);
    }

    #[test]
    fn test_cvd_signs_by_aggressor() {
        let mut a = analyzer();

        let buy = a.on_trade(150_000.0, false, 1_000);
        assert_eq!(buy.cohort, Cohort::Whale);
        assert_eq!(buy.cvd_delta, 150_000.0);

        let sell = a.on_trade(200_000.0, true, 2_000);
        assert_eq!(sell.cvd_delta, -200_000.0);
        assert_eq!(sell.cvd_after, -50_000.0);

        assert_eq!(a.cvd(Cohort::Whale), -50_000.0);
        assert_eq!(a.cvd(Cohort::Minnow), 0.0);
    }

    #[test]
    fn test_cohort_mix_sums_to_one() {
        let mut a = analyzer();
        a.on_trade(150_000.0, false, 1_000); // whale
        a.on_trade(30_000.0, true, 1_100); // dolphin
        a.on_trade(500.0, false, 1_200); // minnow
        a.on_trade(500.0, true, 1_300); // minnow

        let mix = a.cohort_mix(1_400).unwrap();
        let total = mix.whale_pct + mix.dolphin_pct + mix.minnow_pct;
        assert!((total - 1.0).abs() < 1e-12);
        assert!((mix.whale_pct - 150_000.0 / 181_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_cohort_mix_window_expiry() {
        let mut a = analyzer();
        a.on_trade(150_000.0, false, 1_000);
        assert!(a.cohort_mix(30_000).is_some());

        // 61s later the only entry has aged out: absence, not zeros
        assert!(a.cohort_mix(62_000).is_none());
    }

    #[test]
    fn test_dynamic_recompute_keeps_gap_invariant() {
        let mut cfg = SymbolConfig::new("BTCUSDT").unwrap();
        cfg.dynamic_thresholds = true;
        let mut a = WhaleCohortAnalyzer::new(&cfg);

        // Narrow size distribution: p95 alone would violate the 10x gap
        for i in 0..200 {
            a.on_trade(500.0 + (i % 10) as f64, false, 1_000 + i);
        }

        assert!(a.whale_threshold_usd() >= 10.0 * a.minnow_threshold_usd());
        assert!(a.minnow_threshold_usd() >= 100.0); // hard floor holds
    }
}
