//! Outward event definitions
//!
//! Engine events are stamped with a global stream sequence and serialized
//! as `{"sequence", "timestamp", "type", "data"}`. Clients detect gaps from
//! the sequence; a client that fell behind gets a `resync` notice instead of
//! the events it missed.

use chrono::{DateTime, Utc};
use matching_engine::{EngineEvent, LevelDelta};
use serde::{Deserialize, Serialize};
use types::ids::{MarketId, UserAddress};
use types::order::Order;
use types::trade::Trade;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamPayload {
    /// One aggregated price level changed; size 0 removes it
    OrderbookUpdate(LevelDelta),
    Trade(Trade),
    OrderUpdate(Order),
    /// Events were dropped for this client; refetch snapshots
    Resync { missed: u64 },
}

impl From<EngineEvent> for StreamPayload {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::BookDelta(delta) => StreamPayload::OrderbookUpdate(delta),
            EngineEvent::Trade(trade) => StreamPayload::Trade(trade),
            EngineEvent::OrderUpdate(order) => StreamPayload::OrderUpdate(order),
        }
    }
}

/// A sequenced event as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Global stream sequence, gapless from 1; resync notices carry the
    /// sequence of the last event issued before them
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: StreamPayload,
}

impl StreamEvent {
    pub fn resync(last_sequence: u64, missed: u64, now: DateTime<Utc>) -> Self {
        Self {
            sequence: last_sequence,
            timestamp: now,
            payload: StreamPayload::Resync { missed },
        }
    }

    pub fn market_id(&self) -> Option<MarketId> {
        match &self.payload {
            StreamPayload::OrderbookUpdate(delta) => Some(delta.market_id),
            StreamPayload::Trade(trade) => Some(trade.market_id),
            StreamPayload::OrderUpdate(order) => Some(order.market_id),
            StreamPayload::Resync { .. } => None,
        }
    }

    /// Whether `user` is a party to this event
    pub fn concerns(&self, user: &UserAddress) -> bool {
        match &self.payload {
            StreamPayload::Trade(trade) => &trade.taker_address == user || &trade.maker_address == user,
            StreamPayload::OrderUpdate(order) => &order.user_address == user,
            StreamPayload::OrderbookUpdate(_) | StreamPayload::Resync { .. } => false,
        }
    }

    pub fn type_label(&self) -> &'static str {
        match &self.payload {
            StreamPayload::OrderbookUpdate(_) => "orderbook_update",
            StreamPayload::Trade(_) => "trade",
            StreamPayload::OrderUpdate(_) => "order_update",
            StreamPayload::Resync { .. } => "resync",
        }
    }

    pub fn is_resync(&self) -> bool {
        matches!(self.payload, StreamPayload::Resync { .. })
    }
}

/// Per-connection filter chosen by the subscriber
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamFilter {
    pub market_id: Option<MarketId>,
    /// Restrict trades and order updates to one user; book updates still pass
    pub user_address: Option<UserAddress>,
}

impl StreamFilter {
    pub fn matches(&self, event: &StreamEvent) -> bool {
        if event.is_resync() {
            return true;
        }
        if let (Some(wanted), Some(market)) = (self.market_id, event.market_id()) {
            if wanted != market {
                return false;
            }
        }
        match (&self.user_address, &event.payload) {
            (Some(_), StreamPayload::OrderbookUpdate(_)) => true,
            (Some(user), _) => event.concerns(user),
            (None, _) => true,
        }
    }
}
