//! Net position ledger
//!
//! Signed base-asset position per trader, built from this market's fills.
//! Reduce-only orders are checked against it before matching.

use rust_decimal::Decimal;
use std::collections::HashMap;
use types::ids::UserAddress;
use types::order::Side;
use types::trade::Trade;

/// Net positions of one market (long > 0, short < 0)
#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    net: HashMap<UserAddress, Decimal>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a fill into buyer and seller positions
    pub fn apply(&mut self, trade: &Trade) {
        let size = trade.size.as_decimal();
        *self.net.entry(trade.buyer().clone()).or_default() += size;
        *self.net.entry(trade.seller().clone()).or_default() -= size;
    }

    pub fn net_position(&self, user: &UserAddress) -> Decimal {
        self.net.get(user).copied().unwrap_or_default()
    }

    /// Size an order on `side` may trade without growing the position
    pub fn opposite_exposure(&self, user: &UserAddress, side: Side) -> Decimal {
        let net = self.net_position(user);
        match side {
            Side::Buy if net < Decimal::ZERO => -net,
            Side::Sell if net > Decimal::ZERO => net,
            _ => Decimal::ZERO,
        }
    }
}
