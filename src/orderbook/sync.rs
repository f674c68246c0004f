//! Snapshot + diff-stream synchronization
//!
//! Implements the Binance snapshot-to-stream bring-up and the per-diff
//! sequence validation:
//!
//! 1. Buffer diffs while the REST snapshot is in flight.
//! 2. Discard buffered diffs with `final_update_id <= snapshot.last_update_id`.
//! 3. The first retained diff must straddle `snapshot_id + 1`.
//! 4. Every later diff must start at `last_applied + 1` (overlap tolerated,
//!    gap fatal).
//!
//! Any gap or post-apply crossed book surfaces as a `SyncError`; the owning
//! engine responds with exactly one full resync.

use crate::binance::types::{DepthSnapshot, DiffDepthEvent};
use crate::error::{EngineError, SyncError};
use crate::orderbook::book::{OrderBook, Side};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, warn};

/// Result of applying a single diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Diff advanced the book
    Applied,

    /// Diff was already covered by the current state (duplicate or pre-snapshot)
    Stale,
}

/// Owns an `OrderBook` and enforces stream sequencing on every mutation
#[derive(Debug)]
pub struct BookSynchronizer {
    book: OrderBook,
}

impl BookSynchronizer {
    /// Build a synchronized book from a REST snapshot and the diffs buffered
    /// while the snapshot was in flight
    ///
    /// # Errors
    /// * `SyncError::Gap` when the first retained diff does not straddle
    ///   `snapshot_id + 1` - the buffer started too late and a resync with a
    ///   fresh snapshot is required
    /// * `EngineError::Parse` on malformed price/quantity strings
    pub fn initialize(
        symbol: &str,
        snapshot: &DepthSnapshot,
        buffered_diffs: &[DiffDepthEvent],
    ) -> Result<Self, EngineError> {
        let mut book = OrderBook::new(symbol);
        book.last_update_id = snapshot.last_update_id;

        for level in &snapshot.bids {
            let (price, qty) = parse_level(level)?;
            book.apply_level(Side::Bid, price, qty);
        }
        for level in &snapshot.asks {
            let (price, qty) = parse_level(level)?;
            book.apply_level(Side::Ask, price, qty);
        }

        book.validate_integrity()?;

        let mut sync = Self { book };

        // Replay the buffer: pre-snapshot diffs fall out as Stale, the first
        // retained one is checked against the straddle rule below.
        let mut first_retained = true;
        for diff in buffered_diffs {
            if diff.final_update_id <= snapshot.last_update_id {
                debug!(
                    symbol = %symbol,
                    final_update_id = diff.final_update_id,
                    snapshot_id = snapshot.last_update_id,
                    "Discarding pre-snapshot diff"
                );
                continue;
            }

            if first_retained && diff.first_update_id > snapshot.last_update_id + 1 {
                return Err(SyncError::Gap {
                    expected: snapshot.last_update_id + 1,
                    got: diff.first_update_id,
                }
                .into());
            }
            first_retained = false;

            sync.apply_diff(diff)?;
        }

        Ok(sync)
    }

    /// Apply a diff event, enforcing sequence continuity
    ///
    /// Stale events (`final_update_id <= last_update_id`) are rejected
    /// without touching the book: applying a diff twice is a sequencing
    /// bug upstream, never a legal mutation.
    pub fn apply_diff(&mut self, diff: &DiffDepthEvent) -> Result<DiffOutcome, SyncError> {
        let last_id = self.book.last_update_id;

        if diff.final_update_id <= last_id {
            debug!(
                symbol = %self.book.symbol,
                final_update_id = diff.final_update_id,
                last_id,
                "Rejecting stale diff"
            );
            return Ok(DiffOutcome::Stale);
        }

        if diff.first_update_id > last_id + 1 {
            warn!(
                symbol = %self.book.symbol,
                expected = last_id + 1,
                got = diff.first_update_id,
                gap = diff.first_update_id - last_id - 1,
                "Gap in diff stream detected"
            );
            return Err(SyncError::Gap {
                expected: last_id + 1,
                got: diff.first_update_id,
            });
        }

        for level in &diff.bids {
            let (price, qty) = parse_level_lossy(level);
            self.book.apply_level(Side::Bid, price, qty);
        }
        for level in &diff.asks {
            let (price, qty) = parse_level_lossy(level);
            self.book.apply_level(Side::Ask, price, qty);
        }

        self.book.last_update_id = diff.final_update_id;
        self.book.event_time_ms = diff.event_time;

        self.book.validate_integrity()?;

        Ok(DiffOutcome::Applied)
    }

    /// Read access to the synchronized book
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Mutable access for the owning engine (breach sweeps, never ladder edits)
    pub fn book_mut(&mut self) -> &mut OrderBook {
        &mut self.book
    }
}

/// Parse a [price, qty] wire level into decimals
fn parse_level(level: &[String; 2]) -> Result<(Decimal, Decimal), EngineError> {
    let price = Decimal::from_str(&level[0])
        .map_err(|e| EngineError::Parse(format!("invalid price '{}': {}", level[0], e)))?;
    let qty = Decimal::from_str(&level[1])
        .map_err(|e| EngineError::Parse(format!("invalid quantity '{}': {}", level[1], e)))?;
    Ok((price, qty))
}

/// Parse a diff level, treating malformed fields as a deleted level
///
/// A single corrupt level inside an otherwise valid diff must not wedge the
/// stream; it is logged and the level dropped.
fn parse_level_lossy(level: &[String; 2]) -> (Decimal, Decimal) {
    match parse_level(level) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Dropping malformed diff level");
            (Decimal::ZERO, Decimal::ZERO)
        }
    }
}
