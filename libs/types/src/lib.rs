//! Types library for the perpetuals matching engine
//!
//! Core type definitions shared by every service: identifiers, fixed-point
//! numerics, the order/trade data model, market parameters, settlement
//! batches, freeze quotes and the error taxonomy.
//!
//! # Modules
//! - `ids`: Unique identifiers (OrderId, TradeId, BatchId, MarketId, UserAddress)
//! - `numeric`: Fixed-point decimal types (Price, Quantity)
//! - `order`: Order lifecycle types
//! - `trade`: Trade execution types
//! - `fee`: Fee tier types
//! - `market`: Per-market parameters
//! - `settlement`: Settlement batch types
//! - `freeze`: Freeze quote types
//! - `errors`: Error taxonomy

pub mod ids;
pub mod numeric;
pub mod order;
pub mod trade;
pub mod fee;
pub mod market;
pub mod settlement;
pub mod freeze;
pub mod errors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::fee::*;
    pub use crate::freeze::*;
    pub use crate::ids::*;
    pub use crate::market::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::settlement::*;
    pub use crate::trade::*;
}
