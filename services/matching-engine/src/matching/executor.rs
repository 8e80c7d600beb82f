//! Trade execution logic
//!
//! Generates trades with a per-market sequence and picks fee rates from the
//! market's volume tiers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use types::fee::{tier_for, FeeTier};
use types::ids::{MarketId, TradeId, UserAddress};
use types::numeric::{Price, Quantity};
use types::order::Order;
use types::trade::Trade;

/// Match executor for handling trade generation
#[derive(Debug, Clone)]
pub struct MatchExecutor {
    sequence_counter: u64,
    fee_tiers: Vec<FeeTier>,
    /// Cumulative matched notional per trader in this market
    volumes: HashMap<UserAddress, Decimal>,
}

impl MatchExecutor {
    /// Create a new match executor with starting sequence number
    pub fn new(starting_sequence: u64, fee_tiers: Vec<FeeTier>) -> Self {
        Self {
            sequence_counter: starting_sequence,
            fee_tiers,
            volumes: HashMap::new(),
        }
    }

    /// Get next sequence number (monotonically increasing)
    fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence_counter;
        self.sequence_counter += 1;
        seq
    }

    /// Sequence the next trade will receive
    pub fn peek_sequence(&self) -> u64 {
        self.sequence_counter
    }

    /// Move the counter past an already-issued sequence (recovery)
    pub fn resume_past(&mut self, issued: u64) {
        if issued >= self.sequence_counter {
            self.sequence_counter = issued + 1;
        }
    }

    /// Execute a trade between a resting maker and the incoming taker
    ///
    /// `price` is the maker's price. Fee tiers come from each side's volume as
    /// recorded so far; the engine records an order's trades only after the
    /// order is done matching, so every fill of one order shares a tier.
    pub fn execute_trade(
        &mut self,
        market_id: MarketId,
        maker: &Order,
        taker: &Order,
        price: Price,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> Result<Trade, MatchError> {
        if quantity.is_zero() {
            return Err(MatchError::InvalidQuantity);
        }
        if maker.side == taker.side {
            return Err(MatchError::SameSide);
        }

        let taker_tier = tier_for(&self.fee_tiers, self.volume_of(&taker.user_address));
        let maker_tier = tier_for(&self.fee_tiers, self.volume_of(&maker.user_address));

        let trade = Trade {
            id: TradeId::new(),
            sequence: self.next_sequence(),
            market_id,
            taker_order_id: taker.id,
            maker_order_id: maker.id,
            taker_address: taker.user_address.clone(),
            maker_address: maker.user_address.clone(),
            size: quantity,
            price,
            side: taker.side,
            fee_bps: taker_tier.taker_bps,
            maker_fee_bps: maker_tier.maker_bps,
            created_at: now,
        };
        Ok(trade)
    }

    /// Add a trade's notional to both participants' volume
    pub fn record_volume(&mut self, trade: &Trade) {
        let notional = trade.notional();
        *self.volumes.entry(trade.taker_address.clone()).or_default() += notional;
        *self.volumes.entry(trade.maker_address.clone()).or_default() += notional;
    }

    pub fn volume_of(&self, user: &UserAddress) -> Decimal {
        self.volumes.get(user).copied().unwrap_or_default()
    }
}

/// Match execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("trade quantity must be positive")]
    InvalidQuantity,
    #[error("maker and taker are on the same side")]
    SameSide,
}
