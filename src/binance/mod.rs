//! Binance Wire Layer
//!
//! REST snapshot client, stream payload types, WebSocket clients for the
//! diff-depth and aggTrade streams, and the client-side REST rate limiter.

pub mod client;
pub mod rate_limiter;
pub mod types;
pub mod websocket;

// Re-export commonly used types
pub use client::SnapshotClient;
pub use types::{AggTradeEvent, DepthSnapshot, DiffDepthEvent};
