//! Shared test fixtures for the integration suite
//!
//! Builders for snapshots, diffs, trades and a fully wired engine so the
//! scenario tests read like the market sequences they encode.

#![allow(dead_code)]

use microstructure_engine::binance::types::{AggTradeEvent, DepthSnapshot, DiffDepthEvent};
use microstructure_engine::config::SymbolConfig;
use microstructure_engine::derivatives::DerivativesCache;
use microstructure_engine::engine::SymbolEngine;
use microstructure_engine::events::{EventEmitter, MarketEvent};
use microstructure_engine::orderbook::BookSynchronizer;
use tokio::sync::mpsc::UnboundedReceiver;

/// Base exchange time used by the scenario tests (ms)
pub const T0: i64 = 1_700_000_000_000;

/// Snapshot with a thin best ask (0.1 @ 100000) in front of a deep book
pub fn thin_ask_snapshot(last_update_id: i64) -> DepthSnapshot {
    DepthSnapshot {
        last_update_id,
        bids: vec![
            ["99999.0".into(), "2.0".into()],
            ["99998.0".into(), "3.0".into()],
        ],
        asks: vec![
            ["100000.0".into(), "0.1".into()],
            ["100010.0".into(), "5.0".into()],
        ],
    }
}

/// Diff event touching only ask levels
pub fn ask_diff(first: i64, last: i64, event_time: i64, asks: Vec<[&str; 2]>) -> DiffDepthEvent {
    DiffDepthEvent {
        event_type: "depthUpdate".into(),
        event_time,
        symbol: "BTCUSDT".into(),
        first_update_id: first,
        final_update_id: last,
        bids: vec![],
        asks: asks
            .into_iter()
            .map(|[p, q]| [p.to_string(), q.to_string()])
            .collect(),
    }
}

/// Diff event touching only bid levels
pub fn bid_diff(first: i64, last: i64, event_time: i64, bids: Vec<[&str; 2]>) -> DiffDepthEvent {
    DiffDepthEvent {
        event_type: "depthUpdate".into(),
        event_time,
        symbol: "BTCUSDT".into(),
        first_update_id: first,
        final_update_id: last,
        bids: bids
            .into_iter()
            .map(|[p, q]| [p.to_string(), q.to_string()])
            .collect(),
        asks: vec![],
    }
}

/// Aggregated trade at the given price/quantity
pub fn agg_trade(price: &str, qty: &str, trade_time: i64, is_buyer_maker: bool) -> AggTradeEvent {
    AggTradeEvent {
        event_type: "aggTrade".into(),
        event_time: trade_time,
        symbol: "BTCUSDT".into(),
        agg_trade_id: 1,
        price: price.into(),
        quantity: qty.into(),
        first_trade_id: 1,
        last_trade_id: 1,
        trade_time,
        is_buyer_maker,
        is_best_match: true,
    }
}

/// Engine with the default BTC profile and a synchronized thin-ask book
pub fn synced_engine() -> (SymbolEngine, UnboundedReceiver<MarketEvent>) {
    let (emitter, rx) = EventEmitter::channel();
    let config = SymbolConfig::new("BTCUSDT").unwrap();
    let mut engine = SymbolEngine::new(config, emitter, DerivativesCache::disabled());

    let sync = BookSynchronizer::initialize("BTCUSDT", &thin_ask_snapshot(100), &[]).unwrap();
    engine.install_book(sync);
    (engine, rx)
}

/// Drain every event currently queued on the receiver
pub fn drain_events(rx: &mut UnboundedReceiver<MarketEvent>) -> Vec<MarketEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
