//! Trade (fill) types
//!
//! A trade always executes at the resting (maker) order's price and is
//! immutable once created.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{MarketId, OrderId, TradeId, UserAddress};
use crate::numeric::{Price, Quantity};
use crate::order::Side;

/// A single fill between a taker and a resting maker order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    /// Per-market monotonic fill sequence
    pub sequence: u64,
    pub market_id: MarketId,

    // Order references
    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,

    // Account references
    pub taker_address: UserAddress,
    pub maker_address: UserAddress,

    pub size: Quantity,
    /// Maker's price
    pub price: Price,
    /// Taker's side
    pub side: Side,

    /// Taker fee rate in basis points
    pub fee_bps: u32,
    /// Maker fee rate in basis points, negative for a rebate
    pub maker_fee_bps: i32,

    pub created_at: DateTime<Utc>,
}

impl Trade {
    /// Calculate trade value (price × size)
    pub fn notional(&self) -> Decimal {
        self.size.notional(self.price)
    }

    pub fn taker_fee(&self) -> Decimal {
        self.notional() * Decimal::from(self.fee_bps) / Decimal::from(10_000)
    }

    pub fn maker_fee(&self) -> Decimal {
        self.notional() * Decimal::from(self.maker_fee_bps) / Decimal::from(10_000)
    }

    /// Address of the buyer in this fill
    pub fn buyer(&self) -> &UserAddress {
        match self.side {
            Side::Buy => &self.taker_address,
            Side::Sell => &self.maker_address,
        }
    }

    /// Address of the seller in this fill
    pub fn seller(&self) -> &UserAddress {
        match self.side {
            Side::Buy => &self.maker_address,
            Side::Sell => &self.taker_address,
        }
    }
}
