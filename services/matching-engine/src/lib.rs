//! Matching Engine Service
//!
//! Per-market limit order book with price-time priority matching.
//!
//! **Key Invariants:**
//! - Price-time priority strictly enforced (admission sequence breaks ties)
//! - Trades execute at the resting (maker) order's price
//! - A crossed book never persists; observing one halts the market
//! - Rejected orders never mutate the book
//! - Deterministic matching (same inputs and `now` give the same outputs)

pub mod book;
pub mod matching;
pub mod engine;
pub mod events;
pub mod positions;
pub mod registry;

pub use book::{BookLevel, BookSnapshot, OrderBook};
pub use engine::{MarketEngine, RemovalOutcome, SubmitOutcome};
pub use events::{EngineEvent, LevelDelta};
pub use registry::{MarketRegistry, RegistryError};
