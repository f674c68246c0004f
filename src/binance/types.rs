//! Binance Stream and REST Payload Types
//!
//! Wire-format types for the depth snapshot endpoint and the diff-depth /
//! aggTrade WebSocket streams. Prices and quantities arrive as strings and
//! stay strings at this layer; decimal parsing happens at the order book
//! boundary so a malformed level is reported against the book, not the wire.

use serde::{Deserialize, Serialize};

/// REST depth snapshot from GET /api/v3/depth
///
/// # Example Response
/// ```json
/// {
///   "lastUpdateId": 1027024,
///   "bids": [["4.00000000", "431.00000000"]],
///   "asks": [["4.00000200", "12.00000000"]]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    /// Sequence id the snapshot is valid up to (inclusive)
    pub last_update_id: i64,

    /// Bid levels as [price, qty] string tuples, best first
    pub bids: Vec<[String; 2]>,

    /// Ask levels as [price, qty] string tuples, best first
    pub asks: Vec<[String; 2]>,
}

/// Diff-depth event from the `<symbol>@depth@100ms` stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffDepthEvent {
    /// Event type (always "depthUpdate")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time in milliseconds (exchange origin)
    #[serde(rename = "E")]
    pub event_time: i64,

    /// Trading pair symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update id covered by this event
    #[serde(rename = "U")]
    pub first_update_id: i64,

    /// Final update id covered by this event
    #[serde(rename = "u")]
    pub final_update_id: i64,

    /// Bid updates as [price, qty] tuples; qty "0" deletes the level
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,

    /// Ask updates as [price, qty] tuples; qty "0" deletes the level
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

/// Aggregated trade event from the `<symbol>@aggTrade` stream
///
/// `is_buyer_maker == true` means the aggressor sold into the bids;
/// `false` means the aggressor bought from the asks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggTradeEvent {
    /// Event type (always "aggTrade")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time in milliseconds (exchange origin)
    #[serde(rename = "E")]
    pub event_time: i64,

    /// Trading pair symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Aggregate trade id
    #[serde(rename = "a")]
    pub agg_trade_id: u64,

    /// Price (string to preserve precision)
    #[serde(rename = "p")]
    pub price: String,

    /// Quantity (string to preserve precision)
    #[serde(rename = "q")]
    pub quantity: String,

    /// First constituent trade id
    #[serde(rename = "f")]
    pub first_trade_id: u64,

    /// Last constituent trade id
    #[serde(rename = "l")]
    pub last_trade_id: u64,

    /// Trade time in milliseconds (exchange origin)
    #[serde(rename = "T")]
    pub trade_time: i64,

    /// Was the buyer the resting maker? (true = aggressive sell)
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,

    /// Was the trade the best price match?
    #[serde(rename = "M", default)]
    pub is_best_match: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_snapshot_deserialization() {
        let json = r#"{
            "lastUpdateId": 1027024,
            "bids": [["100000.00", "0.43100000"], ["99999.50", "1.20000000"]],
            "asks": [["100000.50", "0.01200000"]]
        }"#;

        let snapshot: DepthSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.last_update_id, 1027024);
        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(snapshot.bids[0][0], "100000.00");
        assert_eq!(snapshot.asks[0][1], "0.01200000");
    }

    #[test]
    fn test_diff_depth_deserialization() {
        let json = r#"{
            "e": "depthUpdate",
            "E": 1699999999123,
            "s": "BTCUSDT",
            "U": 1000,
            "u": 1005,
            "b": [["100000.00", "1.23400"]],
            "a": [["100000.50", "0.00000"]]
        }"#;

        let update: DiffDepthEvent = serde_json::from_str(json).unwrap();
        assert_eq!(update.event_type, "depthUpdate");
        assert_eq!(update.first_update_id, 1000);
        assert_eq!(update.final_update_id, 1005);
        assert_eq!(update.asks[0][1], "0.00000");
    }

    #[test]
    fn test_agg_trade_deserialization() {
        let json = r#"{
            "e": "aggTrade",
            "E": 1672531200000,
            "s": "BTCUSDT",
            "a": 12345,
            "p": "100000.50",
            "q": "1.25",
            "f": 100,
            "l": 105,
            "T": 1672531199999,
            "m": true,
            "M": true
        }"#;

        let trade: AggTradeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.price, "100000.50");
        assert_eq!(trade.trade_time, 1672531199999);
        assert!(trade.is_buyer_maker);
    }
}
