//! Detection Events
//!
//! Typed events emitted by the detection core for downstream consumers
//! (feature extraction, persistence). Every event carries the symbol and the
//! exchange-origin event time; payloads hold the minimum fields a consumer
//! needs to reconstruct state. Emission never blocks the ingestion loop.

use crate::analytics::algo::{AggressorSide, AlgoKind};
use crate::iceberg::level::CancellationContext;
use crate::orderbook::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Cohort classification of a single trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cohort {
    /// Largest trades (institutional size)
    Whale,

    /// Mid-size trades
    Dolphin,

    /// Smallest trades (retail size)
    Minnow,
}

/// Event emitted by the detection core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_kind", rename_all = "snake_case")]
pub enum MarketEvent {
    /// First detection of a hidden level
    IcebergDetected {
        event_id: Uuid,
        symbol: String,
        event_time_ms: i64,
        price: Decimal,
        side: Side,
        hidden_volume: Decimal,
        visible_before: Decimal,
        confidence: f64,
        refill_count: u32,
        delta_t_ms: i64,
    },

    /// Subsequent refill of a known level
    IcebergRefilled {
        event_id: Uuid,
        symbol: String,
        event_time_ms: i64,
        price: Decimal,
        side: Side,
        hidden_volume: Decimal,
        visible_before: Decimal,
        confidence: f64,
        refill_count: u32,
        delta_t_ms: i64,
    },

    /// Price traded through the level
    IcebergBreached {
        event_id: Uuid,
        symbol: String,
        event_time_ms: i64,
        price: Decimal,
        side: Side,
        survival_seconds: f64,
        total_volume_absorbed: Decimal,
        refill_count: u32,
    },

    /// Level fully absorbed without a refill inside the horizon
    IcebergExhausted {
        event_id: Uuid,
        symbol: String,
        event_time_ms: i64,
        price: Decimal,
        side: Side,
        survival_seconds: f64,
        total_volume_absorbed: Decimal,
        refill_count: u32,
    },

    /// Visible remainder disappeared before being filled, or confidence
    /// decayed below the floor
    IcebergCancelled {
        event_id: Uuid,
        symbol: String,
        event_time_ms: i64,
        price: Decimal,
        side: Side,
        survival_seconds: f64,
        total_volume_absorbed: Decimal,
        refill_count: u32,
        cancellation_context: Option<CancellationContext>,
    },

    /// Aggressive execution algorithm classified over the trade window
    AlgoDetected {
        event_id: Uuid,
        symbol: String,
        event_time_ms: i64,
        side: AggressorSide,
        kind: AlgoKind,
        confidence: f64,
        window_size: usize,
    },

    /// Single trade at or above the whale threshold
    WhaleTrade {
        event_id: Uuid,
        symbol: String,
        event_time_ms: i64,
        price: Decimal,
        quantity: Decimal,
        notional_usd: f64,
        side: AggressorSide,
        cohort: Cohort,
    },
}

impl MarketEvent {
    /// Exchange-origin event time carried by every variant
    pub fn event_time_ms(&self) -> i64 {
        match self {
            MarketEvent::IcebergDetected { event_time_ms, .. }
            | MarketEvent::IcebergRefilled { event_time_ms, .. }
            | MarketEvent::IcebergBreached { event_time_ms, .. }
            | MarketEvent::IcebergExhausted { event_time_ms, .. }
            | MarketEvent::IcebergCancelled { event_time_ms, .. }
            | MarketEvent::AlgoDetected { event_time_ms, .. }
            | MarketEvent::WhaleTrade { event_time_ms, .. } => *event_time_ms,
        }
    }

    /// Symbol carried by every variant
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::IcebergDetected { symbol, .. }
            | MarketEvent::IcebergRefilled { symbol, .. }
            | MarketEvent::IcebergBreached { symbol, .. }
            | MarketEvent::IcebergExhausted { symbol, .. }
            | MarketEvent::IcebergCancelled { symbol, .. }
            | MarketEvent::AlgoDetected { symbol, .. }
            | MarketEvent::WhaleTrade { symbol, .. } => symbol,
        }
    }
}

/// Non-blocking event fan-out from the symbol task
///
/// Wraps an unbounded sender: the hot path never awaits on emission, and a
/// dropped consumer is tolerated (events are advisory, the book is the
/// source of truth).
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: mpsc::UnboundedSender<MarketEvent>,
}

impl EventEmitter {
    /// Create an emitter and the receiver the downstream consumer reads
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MarketEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Emit an event; send errors (no active receiver) are ignored
    pub fn emit(&self, event: MarketEvent) {
        tracing::debug!(
            symbol = %event.symbol(),
            event_time_ms = event.event_time_ms(),
            "Emitting market event"
        );
        let _ = self.sender.send(event);
    }
}
