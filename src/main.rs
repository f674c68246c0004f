//! Microstructure Engine Binary
//!
//! Entry point for the detection engine. Loads configuration from the
//! environment, starts one engine task per symbol plus the shared
//! derivatives refresh task, and shuts down cleanly on ctrl-c. Detected
//! events are logged; persistence consumers attach to the same channel.

use anyhow::Context;
use microstructure_engine::binance::client::SnapshotClient;
use microstructure_engine::binance::websocket::{DepthStreamClient, TradeStreamClient};
use microstructure_engine::config::EngineConfig;
use microstructure_engine::derivatives::DerivativesCache;
use microstructure_engine::engine::SymbolEngine;
use microstructure_engine::events::EventEmitter;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter; logs go to stderr so
    // stdout stays free for piped event consumers
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();

    tracing::info!(
        "Starting microstructure engine v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = EngineConfig::from_env().context("engine configuration rejected")?;
    let cancel = CancellationToken::new();

    // Derivatives cache: one producer task per process, readers everywhere
    let derivatives = match &config.derivatives_url {
        Some(url) => {
            let cache = DerivativesCache::new();
            cache.spawn_refresh(url.clone(), config.derivatives_refresh_s, cancel.clone());
            cache
        }
        None => DerivativesCache::disabled(),
    };

    let client = SnapshotClient::new(config.rest_url.clone());
    let mut engine_handles = Vec::new();

    for symbol_config in &config.symbols {
        let symbol = symbol_config.symbol.clone();

        let (depth_client, diff_rx) =
            DepthStreamClient::new(symbol.clone(), config.ws_url.clone());
        depth_client.start();

        let (trade_client, trade_rx) =
            TradeStreamClient::new(symbol.clone(), config.ws_url.clone());
        trade_client.start();

        let (emitter, mut event_rx) = EventEmitter::channel();

        // Downstream consumer: structured event log (persistence attaches
        // here in deployments that carry it)
        let consumer_symbol = symbol.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(symbol = %consumer_symbol, event = %json, "event"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
                }
            }
        });

        let engine = SymbolEngine::new(symbol_config.clone(), emitter, derivatives.clone());
        let engine_client = client.clone();
        let engine_cancel = cancel.clone();
        let snapshot_depth = config.snapshot_depth;
        let cleanup_interval_s = config.cleanup_interval_s;

        // One task per symbol owns all mutable state; a panic or terminal
        // error in one symbol must not poison its siblings
        let handle = tokio::spawn(async move {
            if let Err(e) = engine
                .run(
                    engine_client,
                    snapshot_depth,
                    diff_rx,
                    trade_rx,
                    cleanup_interval_s,
                    engine_cancel,
                )
                .await
            {
                tracing::error!(symbol = %symbol, error = %e, "Symbol engine terminated");
            }
        });
        engine_handles.push(handle);
    }

    tracing::info!(symbols = config.symbols.len(), "All symbol engines started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, draining engines");
    cancel.cancel();

    for handle in engine_handles {
        let _ = handle.await;
    }

    tracing::info!("Engine shut down gracefully");
    Ok(())
}
