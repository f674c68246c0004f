//! Execution-algorithm classification
//!
//! Maintains a ring of the last 200 trades per symbol with synchronized
//! interval and size deques, and classifies sustained one-sided aggression
//! into TWAP / VWAP / ICEBERG_ALGO / SWEEP by timing regularity and size
//! uniformity. The SWEEP check runs before the coefficient-of-variation
//! checks: a sweep may have arbitrary interval variance, its signature is
//! the raw inter-trade latency.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// Entries older than this fall out of the window head (ms)
const WINDOW_MAX_AGE_MS: i64 = 60_000;

/// Size-uniformity fraction above which the flow is an iceberg executor
const UNIFORMITY_THRESHOLD: f64 = 0.90;

/// Mean inter-trade latency below which the flow is a sweep (ms)
const SWEEP_MEAN_MS: f64 = 50.0;

/// Sizes within this relative distance count as the same clip
const SIZE_CLUSTER_TOLERANCE: f64 = 0.05;

/// Aggressor direction of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggressorSide {
    /// Taker bought from the asks
    Buy,

    /// Taker sold into the bids
    Sell,
}

impl AggressorSide {
    /// Map the exchange maker flag to the aggressor direction
    pub fn from_buyer_maker(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            AggressorSide::Sell
        } else {
            AggressorSide::Buy
        }
    }
}

/// Classified execution-algorithm families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlgoKind {
    /// Clockwork intervals, low variance
    Twap,

    /// Volume-paced, moderate interval variance
    Vwap,

    /// Near-identical clip sizes
    IcebergAlgo,

    /// Sub-50ms bursts taking liquidity
    Sweep,

    /// Sustained one-sided flow with no cleaner signature
    GenericAlgo,
}

/// A positive classification over the current window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlgoClassification {
    /// Detected algorithm family
    pub kind: AlgoKind,

    /// Classifier confidence in [0, 1]
    pub confidence: f64,

    /// Dominant aggressor direction
    pub side: AggressorSide,

    /// Trades in the window at classification time
    pub window_size: usize,
}

/// Streaming trade window with synchronized companion deques
///
/// Invariants, checked by the test suite and relied on by the classifier:
/// `|intervals| == max(0, |window| - 1)` and `|sizes| == |window|`.
#[derive(Debug)]
pub struct AlgoWindow {
    capacity: usize,
    directional_threshold: f64,
    window: VecDeque<(i64, AggressorSide)>,
    intervals: VecDeque<i64>,
    sizes: VecDeque<f64>,
}

impl AlgoWindow {
    /// Create a window with the configured capacity and trigger threshold
    pub fn new(capacity: usize, directional_threshold: f64) -> Self {
        Self {
            capacity,
            directional_threshold,
            window: VecDeque::with_capacity(capacity),
            intervals: VecDeque::with_capacity(capacity),
            sizes: VecDeque::with_capacity(capacity),
        }
    }

    /// Trades currently in the window
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// True when no trades are buffered
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Interval entries (test visibility for the length invariant)
    pub fn interval_len(&self) -> usize {
        self.intervals.len()
    }

    /// Size entries (test visibility for the length invariant)
    pub fn size_len(&self) -> usize {
        self.sizes.len()
    }

    /// Append a trade and age out stale entries
    ///
    /// `size_usd` is the trade's quote-currency notional. Out-of-order
    /// event times produce a zero interval rather than a negative one.
    pub fn push(&mut self, event_time_ms: i64, side: AggressorSide, size_usd: f64) {
        if self.window.len() == self.capacity {
            self.pop_front();
        }

        if let Some((last_time, _)) = self.window.back() {
            self.intervals.push_back((event_time_ms - last_time).max(0));
        }
        self.window.push_back((event_time_ms, side));
        self.sizes.push_back(size_usd);

        // Age-out: drop from the head until the oldest entry is fresh
        while let Some((front_time, _)) = self.window.front() {
            if event_time_ms - front_time > WINDOW_MAX_AGE_MS {
                self.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drop the head entry from all three deques in lockstep
    fn pop_front(&mut self) {
        self.window.pop_front();
        self.sizes.pop_front();
        if !self.intervals.is_empty() {
            self.intervals.pop_front();
        }
    }

    /// Classify the current window, if it is full and one-sided enough
    pub fn classify(&self) -> Option<AlgoClassification> {
        let n = self.window.len();
        if n < self.capacity {
            return None;
        }

        let buys = self
            .window
            .iter()
            .filter(|(_, side)| *side == AggressorSide::Buy)
            .count();
        let sells = n - buys;
        let directional_ratio = buys.max(sells) as f64 / n as f64;
        if directional_ratio < self.directional_threshold {
            return None;
        }

        let side = if buys >= sells {
            AggressorSide::Buy
        } else {
            AggressorSide::Sell
        };

        let uniformity = self.size_uniformity();
        let intervals: Vec<f64> = self.intervals.iter().map(|&ms| ms as f64).collect();
        let mean = intervals.iter().copied().mean();
        let std_dev = intervals.iter().copied().std_dev();
        let cv = if mean > 0.0 { std_dev / mean } else { f64::INFINITY };

        // Priority order is load-bearing: uniformity beats timing, and the
        // sweep latency check must run before any CV-based classification.
        let (kind, confidence) = if uniformity > UNIFORMITY_THRESHOLD {
            (AlgoKind::IcebergAlgo, uniformity)
        } else if mean < SWEEP_MEAN_MS {
            let burst = ((SWEEP_MEAN_MS - mean) / SWEEP_MEAN_MS).clamp(0.0, 0.25);
            (AlgoKind::Sweep, 0.75 + burst)
        } else if cv < 0.10 {
            (AlgoKind::Twap, 1.0 - cv * 5.0)
        } else if cv < 0.50 {
            (AlgoKind::Vwap, 0.70 + (0.50 - cv))
        } else if directional_ratio > 0.90 {
            (AlgoKind::GenericAlgo, directional_ratio)
        } else {
            return None;
        };

        Some(AlgoClassification {
            kind,
            confidence,
            side,
            window_size: n,
        })
    }

    /// Fraction of trades whose size sits within 5% of the modal clip
    ///
    /// The mode of a continuous size stream is taken as the size with the
    /// largest 5%-neighborhood.
    fn size_uniformity(&self) -> f64 {
        let n = self.sizes.len();
        if n == 0 {
            return 0.0;
        }

        let mut best = 0usize;
        for &center in &self.sizes {
            let tolerance = center.abs() * SIZE_CLUSTER_TOLERANCE;
            let count = self
                .sizes
                .iter()
                .filter(|&&s| (s - center).abs() <= tolerance)
                .count();
            if count > best {
                best = count;
            }
            // A cluster holding everything cannot be beaten
            if best == n {
                break;
            }
        }

        best as f64 / n as f64
    }
}
