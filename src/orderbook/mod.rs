//! Order Book State and Synchronization
//!
//! Canonical bid/ask ladders with decimal precision and the snapshot+diff
//! synchronizer that keeps them consistent with the exchange stream.

pub mod book;
pub mod sync;

// Re-export commonly used types
pub use book::{OrderBook, Side};
pub use sync::{BookSynchronizer, DiffOutcome};
