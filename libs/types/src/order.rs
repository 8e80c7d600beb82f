//! Order lifecycle types
//!
//! An order is created on admission with status `Pending` and is then only
//! mutated by matching (fills) or by cancellation/expiry. Price only exists
//! on the `Limit` variant of [`OrderKind`], so a market order can never carry
//! one into the book.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::OrderError;
use crate::ids::{MarketId, OrderId, UserAddress};
use crate::numeric::{Price, Quantity};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy order (bid)
    Buy,
    /// Sell order (ask)
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// Market or limit order, with the price carried only where it is valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "order_type")]
pub enum OrderKind {
    Market,
    Limit { price: Price },
}

impl OrderKind {
    pub fn limit_price(&self) -> Option<Price> {
        match self {
            OrderKind::Market => None,
            OrderKind::Limit { price } => Some(*price),
        }
    }

    pub fn is_market(&self) -> bool {
        matches!(self, OrderKind::Market)
    }
}

/// Time-in-force policy for orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-Till-Cancel: remains until filled, cancelled or expired
    #[default]
    GTC,
    /// Immediate-Or-Cancel: match immediately, cancel remainder
    IOC,
    /// Fill-Or-Kill: full match or reject entirely
    FOK,
}

/// Execution flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OrderFlags {
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub post_only: bool,
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Admitted, nothing filled yet
    Pending,
    /// Some size filled, remainder live (or cancelled later)
    PartiallyFilled,
    /// Completely matched (terminal)
    Filled,
    /// Cancelled by the user or by TIF policy (terminal)
    Cancelled,
    /// Expiry reached while resting (terminal)
    Expired,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::PartiallyFilled => "PartiallyFilled",
            OrderStatus::Filled => "Filled",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Expired => "Expired",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated order request that has not been admitted yet
///
/// Produced at the HTTP parse boundary and carried by freeze quotes until
/// confirmation turns it into an [`Order`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub user_address: UserAddress,
    pub market_id: MarketId,
    pub side: Side,
    #[serde(flatten)]
    pub kind: OrderKind,
    pub size: Quantity,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(flatten)]
    pub flags: OrderFlags,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Complete order record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_address: UserAddress,
    pub market_id: MarketId,
    pub side: Side,
    #[serde(flatten)]
    pub kind: OrderKind,
    pub size: Quantity,
    pub filled_size: Quantity,
    pub status: OrderStatus,
    pub time_in_force: TimeInForce,
    #[serde(flatten)]
    pub flags: OrderFlags,
    /// Admission sequence, unique and monotonic per market; 0 until admitted
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a new pending order from a validated intent
    pub fn from_intent(id: OrderId, intent: OrderIntent, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_address: intent.user_address,
            market_id: intent.market_id,
            side: intent.side,
            kind: intent.kind,
            size: intent.size,
            filled_size: Quantity::zero(),
            status: OrderStatus::Pending,
            time_in_force: intent.time_in_force,
            flags: intent.flags,
            sequence: 0,
            created_at: now,
            updated_at: now,
            expires_at: intent.expires_at,
        }
    }

    pub fn limit_price(&self) -> Option<Price> {
        self.kind.limit_price()
    }

    /// Size still open for matching
    pub fn remaining(&self) -> Quantity {
        self.size - self.filled_size
    }

    /// Check if order is completely filled
    pub fn is_filled(&self) -> bool {
        self.filled_size == self.size
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// `0 <= filled <= size`, and Filled exactly when fully matched
    pub fn check_invariant(&self) -> bool {
        self.filled_size <= self.size
            && ((self.status == OrderStatus::Filled) == self.is_filled())
    }

    /// Apply a fill and move the status forward
    pub fn add_fill(&mut self, fill: Quantity, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::InvalidStateTransition {
                from: self.status.to_string(),
                to: "fill".to_string(),
            });
        }
        let new_filled = self.filled_size + fill;
        if new_filled > self.size {
            return Err(OrderError::Overfill {
                order_id: self.id.to_string(),
                size: self.size.to_string(),
                filled: new_filled.to_string(),
            });
        }

        self.filled_size = new_filled;
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = now;
        Ok(())
    }

    /// Cancel the order; terminal orders are not cancellable
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::NotCancellable {
                order_id: self.id.to_string(),
                status: self.status.to_string(),
            });
        }
        self.status = OrderStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Mark a live order as expired
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::InvalidStateTransition {
                from: self.status.to_string(),
                to: OrderStatus::Expired.to_string(),
            });
        }
        self.status = OrderStatus::Expired;
        self.updated_at = now;
        Ok(())
    }
}
