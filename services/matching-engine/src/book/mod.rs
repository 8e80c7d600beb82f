//! Order book infrastructure module
//!
//! Contains price levels, bid book, ask book and the per-market order book
//! that ties them to the resting order records.

pub mod price_level;
pub mod bid_book;
pub mod ask_book;
pub mod order_book;

pub use price_level::PriceLevel;
pub use bid_book::BidBook;
pub use ask_book::AskBook;
pub use order_book::{BookSnapshot, OrderBook};

use serde::{Deserialize, Serialize};
use types::numeric::{Price, Quantity};

/// Aggregated view of one price level
///
/// Derived from the resting orders at that price, never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub size: Quantity,
    pub order_count: u64,
}
