//! Binance WebSocket Clients
//!
//! Connects to the diff-depth (`<symbol>@depth@100ms`) and aggTrade
//! (`<symbol>@aggTrade`) streams for real-time market data. Handles
//! automatic reconnection with exponential backoff (1s doubling, 30s cap)
//! and hands parsed events to the symbol engine via mpsc channels.
//!
//! A reconnect is surfaced to the engine as a `StreamSignal::Reconnected`
//! marker so it can force the mandatory full book resync.

use crate::binance::types::{AggTradeEvent, DiffDepthEvent};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Maximum reconnection delay
const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Messages delivered by a stream client
#[derive(Debug, Clone)]
pub enum StreamSignal<T> {
    /// Parsed stream payload
    Event(T),

    /// Connection was re-established; book state can no longer be trusted
    Reconnected,
}

/// WebSocket client for a single symbol's diff-depth stream
pub struct DepthStreamClient {
    symbol: String,
    base_url: String,
    sender: mpsc::UnboundedSender<StreamSignal<DiffDepthEvent>>,
}

impl DepthStreamClient {
    /// Create a depth stream client for the given symbol
    ///
    /// Returns the client handle and the receiver the engine consumes.
    pub fn new(
        symbol: String,
        base_url: String,
    ) -> (Self, mpsc::UnboundedReceiver<StreamSignal<DiffDepthEvent>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                symbol,
                base_url,
                sender,
            },
            receiver,
        )
    }

    /// Start the stream task with automatic reconnection
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let stream_name = format!("{}@depth@100ms", self.symbol.to_lowercase());
        run_stream_task(self.symbol, self.base_url, stream_name, self.sender)
    }
}

/// WebSocket client for a single symbol's aggTrade stream
pub struct TradeStreamClient {
    symbol: String,
    base_url: String,
    sender: mpsc::UnboundedSender<StreamSignal<AggTradeEvent>>,
}

impl TradeStreamClient {
    /// Create a trade stream client for the given symbol
    pub fn new(
        symbol: String,
        base_url: String,
    ) -> (Self, mpsc::UnboundedReceiver<StreamSignal<AggTradeEvent>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                symbol,
                base_url,
                sender,
            },
            receiver,
        )
    }

    /// Start the stream task with automatic reconnection
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let stream_name = format!("{}@aggTrade", self.symbol.to_lowercase());
        run_stream_task(self.symbol, self.base_url, stream_name, self.sender)
    }
}

/// Spawn the reconnecting read loop shared by both stream kinds
fn run_stream_task<T>(
    symbol: String,
    base_url: String,
    stream_name: String,
    sender: mpsc::UnboundedSender<StreamSignal<T>>,
) -> tokio::task::JoinHandle<()>
where
    T: DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move {
        let url = format!("{}/{}", base_url, stream_name);
        let mut retry_delay = Duration::from_secs(1);
        let mut first_connect = true;

        loop {
            match connect_and_read(&symbol, &url, &sender).await {
                Ok(()) => {
                    info!(symbol = %symbol, stream = %stream_name, "Stream closed by server");
                    retry_delay = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(
                        symbol = %symbol,
                        stream = %stream_name,
                        error = %e,
                        retry_delay_secs = retry_delay.as_secs(),
                        "Stream connection failed, retrying with backoff"
                    );
                }
            }

            if sender.is_closed() {
                info!(symbol = %symbol, stream = %stream_name, "Receiver dropped, stopping stream task");
                return;
            }

            sleep(retry_delay).await;
            retry_delay = std::cmp::min(retry_delay * 2, Duration::from_secs(MAX_RECONNECT_DELAY_SECS));

            // Any reconnect invalidates book continuity; the engine must resync
            if !first_connect && sender.send(StreamSignal::Reconnected).is_err() {
                return;
            }
            first_connect = false;
        }
    })
}

/// Single connection attempt: read until disconnect
async fn connect_and_read<T>(
    symbol: &str,
    url: &str,
    sender: &mpsc::UnboundedSender<StreamSignal<T>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    T: DeserializeOwned,
{
    info!(symbol = %symbol, url = %url, "Connecting to Binance stream");

    let (ws_stream, _) = connect_async(url).await?;
    info!(symbol = %symbol, "WebSocket connected successfully");

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<T>(&text) {
                Ok(event) => {
                    if sender.send(StreamSignal::Event(event)).is_err() {
                        info!(symbol = %symbol, "Receiver dropped, closing WebSocket");
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Failed to parse stream payload");
                }
            },
            Ok(Message::Ping(data)) => {
                debug!(symbol = %symbol, "Received ping, sending pong");
                if write.send(Message::Pong(data)).await.is_err() {
                    warn!(symbol = %symbol, "Failed to send pong");
                    break;
                }
            }
            Ok(Message::Pong(_)) => {
                debug!(symbol = %symbol, "Received pong");
            }
            Ok(Message::Close(frame)) => {
                info!(symbol = %symbol, frame = ?frame, "WebSocket close frame received");
                return Ok(());
            }
            Ok(Message::Binary(_)) => {
                warn!(symbol = %symbol, "Received unexpected binary message");
            }
            Ok(Message::Frame(_)) => {
                // Raw frames are handled internally by tungstenite
            }
            Err(e) => {
                error!(symbol = %symbol, error = %e, "WebSocket error");
                return Err(e.into());
            }
        }
    }

    Err("WebSocket disconnected".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_client_channel_wiring() {
        let (client, mut rx) = DepthStreamClient::new(
            "BTCUSDT".to_string(),
            "wss://stream.binance.com:9443/ws".to_string(),
        );

        let event: DiffDepthEvent = serde_json::from_str(
            r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":10,"u":12,"b":[],"a":[]}"#,
        )
        .unwrap();
        client.sender.send(StreamSignal::Event(event)).unwrap();

        match rx.try_recv().unwrap() {
            StreamSignal::Event(e) => assert_eq!(e.final_update_id, 12),
            StreamSignal::Reconnected => panic!("expected event"),
        }
    }

    #[test]
    fn test_trade_client_stream_name() {
        let (client, _rx) = TradeStreamClient::new(
            "ETHUSDT".to_string(),
            "wss://stream.binance.com:9443/ws".to_string(),
        );
        assert_eq!(client.symbol, "ETHUSDT");
    }
}
