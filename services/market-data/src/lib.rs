//! Market Data Service
//!
//! Turns engine events into the outward stream and keeps the public views
//! derived from fills:
//! - sequenced event stream (`orderbook_update`, `trade`, `order_update`)
//!   with lag detection and resync notices
//! - per-market trade tape with a rolling 24h summary
//!
//! # Architecture
//!
//! ```text
//! MarketEngine events (under the market lock)
//!        │
//!   ┌────▼─────┐
//!   │Publisher │  ← stamps global sequence, bounded broadcast
//!   └────┬─────┘
//!        │
//!   ┌────▼──────────┐      ┌───────────┐
//!   │ Subscriptions │      │ TradeTape │ ← fills only
//!   └───────────────┘      └───────────┘
//! ```

pub mod events;
pub mod publisher;
pub mod trades;

pub use events::{StreamEvent, StreamFilter, StreamPayload};
pub use publisher::{StreamPublisher, Subscription};
pub use trades::{MarketSummary, PublicTrade, TradeTape};
