//! Freeze quote types for two-phase admission
//!
//! A quote carries the validated order intent and the unsigned collateral
//! lock transaction the trader must sign before the order can go live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::OrderId;
use crate::order::OrderIntent;

/// Unsigned entry-function call that locks collateral on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeTransactionPayload {
    /// Fully qualified entry function, e.g. `0x1::vault::freeze_funds`
    pub function: String,
    pub type_arguments: Vec<String>,
    pub arguments: Vec<String>,
    pub gas_limit: u64,
    pub gas_unit_price: u64,
}

/// Admission state of an order in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FreezeState {
    Requested,
    Frozen,
    Confirmed,
    Admitted,
    Rejected,
    Expired,
}

impl FreezeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FreezeState::Admitted | FreezeState::Rejected | FreezeState::Expired)
    }
}

impl fmt::Display for FreezeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Pending freeze quote, keyed by the pre-assigned order id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeQuote {
    pub order_id: OrderId,
    pub intent: OrderIntent,
    /// Collateral in base units of the collateral coin
    pub required_collateral: u64,
    pub payload: FreezeTransactionPayload,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FreezeQuote {
    /// A quote is dead from its expiry instant onwards
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(FreezeState::Admitted.is_terminal());
        assert!(FreezeState::Expired.is_terminal());
        assert!(!FreezeState::Frozen.is_terminal());
    }
}
