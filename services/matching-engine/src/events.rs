//! Events emitted by the per-market engine
//!
//! Every mutation yields an ordered list of these. They are transport
//! agnostic; the gateway stamps them with a stream sequence and fans them out.

use serde::{Deserialize, Serialize};
use types::ids::MarketId;
use types::numeric::{Price, Quantity};
use types::order::{Order, Side};
use types::trade::Trade;

/// New aggregate of one price level after a mutation
///
/// A zero size means the level is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelDelta {
    pub market_id: MarketId,
    pub side: Side,
    pub price: Price,
    pub size: Quantity,
    pub order_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    BookDelta(LevelDelta),
    Trade(Trade),
    /// Latest state of an order whose status or fill changed
    OrderUpdate(Order),
}

impl EngineEvent {
    pub fn market_id(&self) -> MarketId {
        match self {
            EngineEvent::BookDelta(delta) => delta.market_id,
            EngineEvent::Trade(trade) => trade.market_id,
            EngineEvent::OrderUpdate(order) => order.market_id,
        }
    }
}
