//! Order book ladders
//!
//! Maintains sorted bid/ask levels using BTreeMap for efficient best-price
//! and range queries. All ladder state is decimal; floats appear only in
//! derived metrics (OBI, mid as f64 for downstream features).

use crate::error::SyncError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Resting buy interest (support)
    Bid,

    /// Resting sell interest (resistance)
    Ask,
}

impl Side {
    /// The side a resting iceberg sits on, given the trade aggressor
    ///
    /// An aggressive buy (`is_buyer_maker == false`) consumes asks, so the
    /// refilled level is an ask; an aggressive sell consumes bids.
    pub fn resting_from_aggressor(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            Side::Bid
        } else {
            Side::Ask
        }
    }

    /// True for the ask side
    pub fn is_ask(&self) -> bool {
        matches!(self, Side::Ask)
    }
}

/// Order book state for a single trading symbol
///
/// Single-writer: only the owning symbol task mutates the ladders.
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Trading pair symbol (uppercase, e.g. "BTCUSDT")
    pub symbol: String,

    /// Bid levels: price -> quantity (best bid = last key)
    pub bids: BTreeMap<Decimal, Decimal>,

    /// Ask levels: price -> quantity (best ask = first key)
    pub asks: BTreeMap<Decimal, Decimal>,

    /// Last applied update id from the exchange
    pub last_update_id: i64,

    /// Exchange event time of the last applied update (ms)
    pub event_time_ms: i64,
}

impl OrderBook {
    /// Create a new empty order book for the given symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            event_time_ms: 0,
        }
    }

    /// Get best bid price (highest bid)
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Get best ask price (lowest ask)
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Mid price, when both sides are present
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some((bid + ask) / Decimal::TWO)
    }

    /// Visible quantity resting at the given price on the given side
    ///
    /// Returns zero for absent levels.
    pub fn volume_at(&self, price: Decimal, side: Side) -> Decimal {
        let ladder = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        ladder.get(&price).copied().unwrap_or(Decimal::ZERO)
    }

    /// Apply a level update (zero quantity deletes the price level)
    ///
    /// # Panics
    /// Panics on a negative quantity: the exchange never sends one, so a
    /// negative here means upstream parsing is broken, not a market state.
    pub fn apply_level(&mut self, side: Side, price: Decimal, quantity: Decimal) {
        assert!(
            quantity.is_sign_positive() || quantity.is_zero(),
            "negative quantity {} at {} breaks the ladder invariant",
            quantity,
            price
        );

        let ladder = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };

        if quantity.is_zero() {
            ladder.remove(&price);
        } else {
            ladder.insert(price, quantity);
        }
    }

    /// Verify the no-crossed-book invariant
    ///
    /// A crossed book after applying a well-sequenced diff means local state
    /// has diverged from the exchange; the caller must resync.
    pub fn validate_integrity(&self) -> Result<(), SyncError> {
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                return Err(SyncError::CrossedBook {
                    bid: bid.to_string(),
                    ask: ask.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Exponentially depth-weighted order book imbalance over the top levels
    ///
    /// `sum(bid_qty_i * w_i) - sum(ask_qty_i * w_i)` with `w_i = e^(-lambda * i)`,
    /// i counted from the best level outward on each side. Positive values
    /// indicate bid-side pressure. Returns None on an empty book.
    pub fn weighted_obi(&self, depth: usize, lambda: f64) -> Option<f64> {
        if self.bids.is_empty() && self.asks.is_empty() {
            return None;
        }

        let bid_side: f64 = self
            .bids
            .values()
            .rev()
            .take(depth)
            .enumerate()
            .map(|(i, qty)| qty.to_f64().unwrap_or(0.0) * (-lambda * i as f64).exp())
            .sum();

        let ask_side: f64 = self
            .asks
            .values()
            .take(depth)
            .enumerate()
            .map(|(i, qty)| qty.to_f64().unwrap_or(0.0) * (-lambda * i as f64).exp())
            .sum();

        Some(bid_side - ask_side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_book() -> OrderBook {
        let mut book = OrderBook::new("BTCUSDT");
        book.apply_level(Side::Bid, dec!(99999), dec!(2.0));
        book.apply_level(Side::Bid, dec!(99998), dec!(1.0));
        book.apply_level(Side::Ask, dec!(100001), dec!(1.5));
        book.apply_level(Side::Ask, dec!(100002), dec!(3.0));
        book
    }

    #[test]
    fn test_best_prices_and_mid() {
        let book = sample_book();
        assert_eq!(book.best_bid(), Some(dec!(99999)));
        assert_eq!(book.best_ask(), Some(dec!(100001)));
        assert_eq!(book.mid_price(), Some(dec!(100000)));
    }

    #[test]
    fn test_zero_quantity_deletes_level() {
        let mut book = sample_book();
        book.apply_level(Side::Ask, dec!(100001), Decimal::ZERO);
        assert_eq!(book.best_ask(), Some(dec!(100002)));
        assert_eq!(book.volume_at(dec!(100001), Side::Ask), Decimal::ZERO);
    }

    #[test]
    fn test_volume_at_absent_level_is_zero() {
        let book = sample_book();
        assert_eq!(book.volume_at(dec!(12345), Side::Bid), Decimal::ZERO);
        assert_eq!(book.volume_at(dec!(99999), Side::Bid), dec!(2.0));
    }

    #[test]
    fn test_integrity_detects_crossed_book() {
        let mut book = sample_book();
        assert!(book.validate_integrity().is_ok());

        book.apply_level(Side::Bid, dec!(100001.5), dec!(0.1));
        assert!(matches!(
            book.validate_integrity(),
            Err(SyncError::CrossedBook { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "negative quantity")]
    fn test_negative_quantity_panics() {
        let mut book = sample_book();
        book.apply_level(Side::Bid, dec!(99999), dec!(-1.0));
    }

    #[test]
    fn test_weighted_obi_favors_heavier_side() {
        let book = sample_book();
        // Bid qty 2.0 + 1.0*e^-0.5 vs ask 1.5 + 3.0*e^-0.5
        let obi = book.weighted_obi(10, 0.5).unwrap();
        let expected = (2.0 + 1.0 * (-0.5f64).exp()) - (1.5 + 3.0 * (-0.5f64).exp());
        assert!((obi - expected).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_obi_empty_book_is_absent() {
        let book = OrderBook::new("BTCUSDT");
        assert!(book.weighted_obi(10, 0.5).is_none());
    }

    #[test]
    fn test_resting_side_from_aggressor() {
        assert_eq!(Side::resting_from_aggressor(false), Side::Ask);
        assert_eq!(Side::resting_from_aggressor(true), Side::Bid);
    }
}
