//! Per-symbol detection engine
//!
//! One cooperative task owns the order book and every piece of detection
//! state for its symbol; nothing else mutates them. The task multiplexes
//! the diff stream, the trade stream and a cleanup timer, and drives the
//! detection pipeline synchronously:
//!
//! trade -> cohorts / VPIN / algo window / breach check / pending queue
//! diff  -> synchronizer -> pending matches -> detector -> adjuster ->
//!          registry -> events
//!
//! Any sequencing failure (gap, crossed book) triggers exactly one full
//! resync through the rate-limited snapshot client; derived state survives.

use crate::analytics::{AggressorSide, AlgoKind, AlgoWindow, FlowToxicityAnalyzer, WhaleCohortAnalyzer};
use crate::binance::client::SnapshotClient;
use crate::binance::types::{AggTradeEvent, DiffDepthEvent};
use crate::binance::websocket::StreamSignal;
use crate::config::SymbolConfig;
use crate::derivatives::{DerivativesCache, DerivativesSnapshot};
use crate::error::{EngineError, SyncError};
use crate::events::{Cohort, EventEmitter, MarketEvent};
use crate::iceberg::{
    FlowContext, IcebergDetector, IcebergRegistry, IcebergStatus, IcebergTransition,
    PendingRefillCheck, PendingRefillQueue, RefillConfidenceAdjuster, RefillOutcome,
};
use crate::orderbook::{BookSynchronizer, DiffOutcome, OrderBook, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Backoff cap while a resync keeps failing
const RESYNC_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Detection core for a single symbol
pub struct SymbolEngine {
    config: SymbolConfig,
    sync: Option<BookSynchronizer>,
    pending: PendingRefillQueue,
    detector: IcebergDetector,
    adjuster: RefillConfidenceAdjuster,
    registry: IcebergRegistry,
    cohorts: WhaleCohortAnalyzer,
    algo: AlgoWindow,
    vpin: FlowToxicityAnalyzer,
    emitter: EventEmitter,
    derivatives: DerivativesCache,
    last_algo_kind: Option<AlgoKind>,
    last_sweep_mark: Option<(i64, Decimal)>,
    last_event_time_ms: i64,
    resync_count: u64,
}

impl SymbolEngine {
    /// Build an engine from a validated symbol config
    pub fn new(config: SymbolConfig, emitter: EventEmitter, derivatives: DerivativesCache) -> Self {
        let detector = IcebergDetector::new(&config);
        let registry =
            IcebergRegistry::new(config.iceberg_decay_half_life_s, config.iceberg_max_ttl_s);
        let cohorts = WhaleCohortAnalyzer::new(&config);
        let algo = AlgoWindow::new(config.algo_window_size, config.algo_directional_threshold);
        let vpin = FlowToxicityAnalyzer::new(
            config.vpin_bucket_size_usd,
            config.vpin_min_buckets,
            config.vpin_flat_threshold,
        );

        Self {
            config,
            sync: None,
            pending: PendingRefillQueue::new(),
            detector,
            adjuster: RefillConfidenceAdjuster::new(),
            registry,
            cohorts,
            algo,
            vpin,
            emitter,
            derivatives,
            last_algo_kind: None,
            last_sweep_mark: None,
            last_event_time_ms: 0,
            resync_count: 0,
        }
    }

    /// The symbol this engine owns
    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    /// Synchronized book, when available
    pub fn book(&self) -> Option<&OrderBook> {
        self.sync.as_ref().map(|s| s.book())
    }

    /// Tracked iceberg registry (read-only)
    pub fn registry(&self) -> &IcebergRegistry {
        &self.registry
    }

    /// Full resyncs performed so far
    pub fn resync_count(&self) -> u64 {
        self.resync_count
    }

    /// Latest derivatives context, absent when the cache is disabled/cold
    pub fn derivatives_context(&self) -> Option<DerivativesSnapshot> {
        self.derivatives.snapshot()
    }

    /// Depth-weighted order book imbalance with the configured lambda
    ///
    /// Feature-consumer API; absent while unsynchronized or on an empty book.
    pub fn weighted_obi(&self, depth: usize) -> Option<f64> {
        self.sync
            .as_ref()
            .and_then(|s| s.book().weighted_obi(depth, self.config.obi_lambda))
    }

    /// Install a freshly synchronized book (resync completion)
    pub fn install_book(&mut self, sync: BookSynchronizer) {
        self.resync_count += 1;
        info!(
            symbol = %self.config.symbol,
            update_id = sync.book().last_update_id,
            resync_count = self.resync_count,
            "Book synchronized"
        );
        self.sync = Some(sync);
    }

    /// Ingest one trade event
    ///
    /// Updates cohorts, VPIN and the algo window in arrival order, checks
    /// breaches against the registry, then queues the refill candidate.
    pub fn on_trade(&mut self, trade: &AggTradeEvent) -> Result<(), EngineError> {
        let price = Decimal::from_str(&trade.price)
            .map_err(|e| EngineError::Parse(format!("trade price '{}': {}", trade.price, e)))?;
        let quantity = Decimal::from_str(&trade.quantity)
            .map_err(|e| EngineError::Parse(format!("trade qty '{}': {}", trade.quantity, e)))?;

        let trade_time = trade.trade_time;
        self.last_event_time_ms = self.last_event_time_ms.max(trade_time);

        let notional = (price * quantity).to_f64().unwrap_or(0.0);
        let aggressor = AggressorSide::from_buyer_maker(trade.is_buyer_maker);

        // CVD and VPIN strictly in trade arrival order
        let cohort_update = self.cohorts.on_trade(notional, trade.is_buyer_maker, trade_time);
        self.vpin
            .on_trade(notional, aggressor == AggressorSide::Buy);

        if cohort_update.cohort == Cohort::Whale {
            self.emitter.emit(MarketEvent::WhaleTrade {
                event_id: Uuid::new_v4(),
                symbol: self.config.symbol.clone(),
                event_time_ms: trade_time,
                price,
                quantity,
                notional_usd: notional,
                side: aggressor,
                cohort: Cohort::Whale,
            });
        }

        // Algo window; re-emit only when the classified family changes
        self.algo.push(trade_time, aggressor, notional);
        match self.algo.classify() {
            Some(classification) if Some(classification.kind) != self.last_algo_kind => {
                self.last_algo_kind = Some(classification.kind);
                self.emitter.emit(MarketEvent::AlgoDetected {
                    event_id: Uuid::new_v4(),
                    symbol: self.config.symbol.clone(),
                    event_time_ms: trade_time,
                    side: classification.side,
                    kind: classification.kind,
                    confidence: classification.confidence,
                    window_size: classification.window_size,
                });
            }
            Some(_) => {}
            None => self.last_algo_kind = None,
        }

        // Registry bookkeeping before the candidate is queued
        self.registry.note_trade(price, quantity);
        for transition in self.registry.check_breaches(price, trade_time) {
            self.emit_transition(transition, trade_time);
        }

        // Queue the refill candidate against the pre-trade visible volume
        self.pending.gc(trade_time);
        if let Some(sync) = &self.sync {
            let side = Side::resting_from_aggressor(trade.is_buyer_maker);
            let visible_before = sync.book().volume_at(price, side);
            self.pending.push(PendingRefillCheck {
                price,
                side,
                trade_qty: quantity,
                visible_before,
                trade_time_ms: trade_time,
                is_buyer_maker: trade.is_buyer_maker,
                mid_at_trade: sync.book().mid_price(),
            });
        }

        Ok(())
    }

    /// Ingest one diff event
    ///
    /// Applies the diff through the synchronizer, then scans the touched
    /// levels for pending refill candidates. A `SyncError` means the caller
    /// must resync.
    pub fn on_diff(&mut self, diff: &DiffDepthEvent) -> Result<DiffOutcome, SyncError> {
        let Some(sync) = self.sync.as_mut() else {
            // Not synchronized yet; the run loop buffers via resync
            return Ok(DiffOutcome::Stale);
        };

        let outcome = sync.apply_diff(diff)?;
        if outcome == DiffOutcome::Stale {
            return Ok(outcome);
        }

        self.last_event_time_ms = self.last_event_time_ms.max(diff.event_time);
        self.scan_refills(diff);

        Ok(outcome)
    }

    /// Match diff levels against pending candidates and run the pipeline
    fn scan_refills(&mut self, diff: &DiffDepthEvent) {
        let sides: [(Side, &Vec<[String; 2]>); 2] =
            [(Side::Bid, &diff.bids), (Side::Ask, &diff.asks)];

        for (side, levels) in sides {
            for level in levels {
                let (Ok(price), Ok(qty)) =
                    (Decimal::from_str(&level[0]), Decimal::from_str(&level[1]))
                else {
                    continue;
                };
                if qty.is_zero() {
                    continue;
                }

                for check in self.pending.take_matches(price, side, qty) {
                    self.evaluate_refill(&check, diff.event_time);
                }
            }
        }
    }

    /// Detector -> adjuster -> registry -> event for one matched candidate
    fn evaluate_refill(&mut self, check: &PendingRefillCheck, diff_event_time_ms: i64) {
        let Some(detection) = self.detector.evaluate(check, diff_event_time_ms) else {
            return;
        };

        let ctx = self.flow_context(check, diff_event_time_ms);
        let confidence = self.adjuster.adjust(detection.base_confidence, &ctx);

        let (outcome, level) =
            self.registry
                .upsert_refill(&detection, confidence, diff_event_time_ms);
        let refill_count = level.refill_count;

        debug!(
            symbol = %self.config.symbol,
            price = %detection.price,
            hidden = %detection.hidden_volume,
            confidence,
            delta_t_ms = detection.delta_t_ms,
            ?outcome,
            "Iceberg refill accepted"
        );

        let event = match outcome {
            RefillOutcome::Detected => MarketEvent::IcebergDetected {
                event_id: Uuid::new_v4(),
                symbol: self.config.symbol.clone(),
                event_time_ms: diff_event_time_ms,
                price: detection.price,
                side: detection.side,
                hidden_volume: detection.hidden_volume,
                visible_before: detection.visible_before,
                confidence,
                refill_count,
                delta_t_ms: detection.delta_t_ms,
            },
            RefillOutcome::Refilled => MarketEvent::IcebergRefilled {
                event_id: Uuid::new_v4(),
                symbol: self.config.symbol.clone(),
                event_time_ms: diff_event_time_ms,
                price: detection.price,
                side: detection.side,
                hidden_volume: detection.hidden_volume,
                visible_before: detection.visible_before,
                confidence,
                refill_count,
                delta_t_ms: detection.delta_t_ms,
            },
        };
        self.emitter.emit(event);
    }

    /// Assemble the flow conditions the adjuster disambiguates on
    fn flow_context(&mut self, check: &PendingRefillCheck, now_ms: i64) -> FlowContext {
        let (whale_pct, minnow_pct) = match self.cohorts.cohort_mix(now_ms) {
            Some(mix) => (mix.whale_pct, mix.minnow_pct),
            None => (0.0, 0.0),
        };

        let (drift_bps, drift_opposes) = match (
            check.mid_at_trade,
            self.sync.as_ref().and_then(|s| s.book().mid_price()),
        ) {
            (Some(mid_then), Some(mid_now)) if !mid_then.is_zero() => {
                let drift = ((mid_now - mid_then) / mid_then * Decimal::from(10_000))
                    .to_f64()
                    .unwrap_or(0.0);
                // Drift into the wall: up into an ask iceberg, down into a bid
                let opposes = match check.side {
                    Side::Ask => drift > 0.0,
                    Side::Bid => drift < 0.0,
                };
                (drift.abs(), opposes)
            }
            _ => (0.0, false),
        };

        FlowContext {
            vpin: self.vpin.current_vpin(),
            whale_volume_pct: whale_pct,
            minnow_volume_pct: minnow_pct,
            price_drift_bps: drift_bps,
            drift_opposes,
        }
    }

    /// Periodic maintenance: registry sweep and pending GC
    ///
    /// `now_ms` is wall clock injected at the timer boundary; every
    /// downstream computation takes it as an explicit parameter.
    pub fn sweep(&mut self, now_ms: i64) {
        self.pending.gc(now_ms);

        let Some(sync) = self.sync.as_ref() else {
            return;
        };
        let mid = sync.book().mid_price();

        let drift_bps_per_s = match (self.last_sweep_mark, mid) {
            (Some((then_ms, mid_then)), Some(mid_now))
                if now_ms > then_ms && !mid_then.is_zero() =>
            {
                let drift_bps = ((mid_now - mid_then) / mid_then * Decimal::from(10_000))
                    .to_f64()
                    .unwrap_or(0.0);
                drift_bps / ((now_ms - then_ms) as f64 / 1000.0)
            }
            _ => 0.0,
        };
        if let Some(mid_now) = mid {
            self.last_sweep_mark = Some((now_ms, mid_now));
        }

        let book = sync.book();
        let transitions = self.registry.sweep(now_ms, book, mid, drift_bps_per_s);
        for transition in transitions {
            self.emit_transition(transition, now_ms);
        }
    }

    /// Map a registry transition to its terminal event
    fn emit_transition(&self, transition: IcebergTransition, event_time_ms: i64) {
        let level = transition.level;
        let event_id = Uuid::new_v4();
        let symbol = self.config.symbol.clone();

        let event = match level.status {
            IcebergStatus::Breached => MarketEvent::IcebergBreached {
                event_id,
                symbol,
                event_time_ms,
                price: level.price,
                side: level.side,
                survival_seconds: transition.survival_seconds,
                total_volume_absorbed: level.total_volume_absorbed(),
                refill_count: level.refill_count,
            },
            IcebergStatus::Exhausted => MarketEvent::IcebergExhausted {
                event_id,
                symbol,
                event_time_ms,
                price: level.price,
                side: level.side,
                survival_seconds: transition.survival_seconds,
                total_volume_absorbed: level.total_volume_absorbed(),
                refill_count: level.refill_count,
            },
            IcebergStatus::Cancelled => MarketEvent::IcebergCancelled {
                event_id,
                symbol,
                event_time_ms,
                price: level.price,
                side: level.side,
                survival_seconds: transition.survival_seconds,
                total_volume_absorbed: level.total_volume_absorbed(),
                refill_count: level.refill_count,
                cancellation_context: level.cancellation_context,
            },
            IcebergStatus::Active => {
                // Registry never surfaces an ACTIVE transition
                error!(price = %level.price, "Transition for an active level");
                return;
            }
        };
        self.emitter.emit(event);
    }

    /// Drive the engine until cancellation
    ///
    /// Performs the initial synchronization, then multiplexes the two
    /// streams and the cleanup timer. Gaps, crossed books and stream
    /// reconnects each trigger one full resync; in-flight icebergs stay
    /// ACTIVE across shutdown.
    pub async fn run(
        mut self,
        client: SnapshotClient,
        snapshot_depth: usize,
        mut diff_rx: mpsc::UnboundedReceiver<StreamSignal<DiffDepthEvent>>,
        mut trade_rx: mpsc::UnboundedReceiver<StreamSignal<AggTradeEvent>>,
        cleanup_interval_s: u64,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        self.resync(&client, snapshot_depth, &mut diff_rx, &cancel)
            .await?;

        let mut cleanup = tokio::time::interval(Duration::from_secs(cleanup_interval_s.max(1)));
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(symbol = %self.config.symbol, "Engine shutting down");
                    return Ok(());
                }

                signal = diff_rx.recv() => match signal {
                    Some(StreamSignal::Event(diff)) => {
                        if let Err(e) = self.on_diff(&diff) {
                            warn!(symbol = %self.config.symbol, error = %e, "Resync required");
                            self.sync = None;
                            self.resync(&client, snapshot_depth, &mut diff_rx, &cancel).await?;
                        }
                    }
                    Some(StreamSignal::Reconnected) => {
                        warn!(symbol = %self.config.symbol, "Depth stream reconnected, forcing resync");
                        self.sync = None;
                        self.resync(&client, snapshot_depth, &mut diff_rx, &cancel).await?;
                    }
                    None => {
                        info!(symbol = %self.config.symbol, "Depth stream closed, stopping engine");
                        return Ok(());
                    }
                },

                signal = trade_rx.recv() => match signal {
                    Some(StreamSignal::Event(trade)) => {
                        if let Err(e) = self.on_trade(&trade) {
                            warn!(symbol = %self.config.symbol, error = %e, "Dropped malformed trade");
                        }
                    }
                    Some(StreamSignal::Reconnected) => {
                        warn!(symbol = %self.config.symbol, "Trade stream reconnected, forcing resync");
                        self.sync = None;
                        self.resync(&client, snapshot_depth, &mut diff_rx, &cancel).await?;
                    }
                    None => {
                        info!(symbol = %self.config.symbol, "Trade stream closed, stopping engine");
                        return Ok(());
                    }
                },

                _ = cleanup.tick() => {
                    // Wall clock enters only at this boundary; floored at the
                    // tape's own time so a skewed host clock cannot rewind decay
                    let now_ms = chrono::Utc::now()
                        .timestamp_millis()
                        .max(self.last_event_time_ms);
                    self.sweep(now_ms);
                }
            }
        }
    }

    /// Full resync: fetch a snapshot, use the queued diffs as the buffer
    ///
    /// Transient fetch failures retry with exponential backoff; a gap
    /// between snapshot and buffer refetches the snapshot.
    async fn resync(
        &mut self,
        client: &SnapshotClient,
        snapshot_depth: usize,
        diff_rx: &mut mpsc::UnboundedReceiver<StreamSignal<DiffDepthEvent>>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let mut backoff = Duration::from_millis(250);

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Internal(
                    "shutdown requested during resync".to_string(),
                ));
            }

            let snapshot = match client.fetch_depth(&self.config.symbol, snapshot_depth).await {
                Ok(snapshot) => snapshot,
                Err(e) if e.is_retryable() => {
                    warn!(
                        symbol = %self.config.symbol,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Snapshot fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, RESYNC_BACKOFF_CAP);
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Diffs that queued up while the snapshot was in flight are the
            // buffered stream; anything pre-snapshot falls out as stale.
            let mut buffered = Vec::new();
            while let Ok(signal) = diff_rx.try_recv() {
                if let StreamSignal::Event(diff) = signal {
                    buffered.push(diff);
                }
            }

            match BookSynchronizer::initialize(&self.config.symbol, &snapshot, &buffered) {
                Ok(sync) => {
                    self.install_book(sync);
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    warn!(
                        symbol = %self.config.symbol,
                        error = %e,
                        "Snapshot/buffer mismatch, refetching"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, RESYNC_BACKOFF_CAP);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
