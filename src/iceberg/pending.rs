//! Pending refill queue
//!
//! Holds trades awaiting post-trade book confirmation. A candidate lives at
//! most 100 ms: deliberately longer than the 50 ms detection horizon so a
//! late diff still meets its candidate and gets rejected on Δt instead of
//! silently vanishing. Garbage collection runs on every new trade.

use crate::orderbook::Side;
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Candidate retention past the trade event (ms)
pub const RETENTION_MS: i64 = 100;

/// Hard cap on queued candidates
const MAX_PENDING: usize = 256;

/// A trade awaiting its post-trade book confirmation
#[derive(Debug, Clone)]
pub struct PendingRefillCheck {
    /// Price the trade executed at
    pub price: Decimal,

    /// Resting side consumed by the trade (opposite the aggressor)
    pub side: Side,

    /// Traded quantity (base asset)
    pub trade_qty: Decimal,

    /// Visible quantity at the price before the trade was reflected
    pub visible_before: Decimal,

    /// Exchange trade time (ms)
    pub trade_time_ms: i64,

    /// Aggressor direction as reported by the exchange
    pub is_buyer_maker: bool,

    /// Mid price when the candidate was created (drift reference)
    pub mid_at_trade: Option<Decimal>,
}

/// Bounded FIFO of refill candidates for one symbol
#[derive(Debug, Default)]
pub struct PendingRefillQueue {
    checks: VecDeque<PendingRefillCheck>,
}

impl PendingRefillQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            checks: VecDeque::with_capacity(64),
        }
    }

    /// Number of live candidates
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// True when no candidates are queued
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Drop candidates older than the retention horizon
    ///
    /// `now_ms` is exchange time (the arriving trade's event time); wall
    /// clock never enters the Δt math.
    pub fn gc(&mut self, now_ms: i64) {
        while let Some(front) = self.checks.front() {
            if now_ms - front.trade_time_ms > RETENTION_MS {
                self.checks.pop_front();
            } else {
                break;
            }
        }
    }

    /// Queue a new candidate, evicting the oldest when at capacity
    pub fn push(&mut self, check: PendingRefillCheck) {
        if self.checks.len() >= MAX_PENDING {
            self.checks.pop_front();
        }
        self.checks.push_back(check);
    }

    /// Remove and return candidates matched by a diff level
    ///
    /// A candidate matches when the diff touches the same price on the same
    /// side and the restored quantity is at least the pre-trade visible
    /// volume - the signature of a replenished display quantity.
    pub fn take_matches(
        &mut self,
        price: Decimal,
        side: Side,
        restored_qty: Decimal,
    ) -> Vec<PendingRefillCheck> {
        let mut matched = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.checks.len());

        for check in self.checks.drain(..) {
            if check.price == price && check.side == side && restored_qty >= check.visible_before {
                matched.push(check);
            } else {
                remaining.push_back(check);
            }
        }

        self.checks = remaining;
        matched
    }
}
