//! Settlement batch types
//!
//! A batch groups fills of one market together with the reference price it
//! was built against. The price band is fixed at build time; a retry rebuilds
//! the band and expiry but never changes the fill set.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, MarketId, TradeId};
use crate::numeric::Price;
use crate::trade::Trade;

/// Batch submission status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Built, not yet sent
    Pending,
    /// Sent to the settlement service, outcome unknown
    Submitted,
    /// Applied on chain
    Settled,
    /// Definitely rejected; eligible for rebuild
    Failed,
    /// Outcome ambiguous; waits for operator resolution
    NeedsReconciliation,
}

/// Inclusive acceptable price range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBand {
    pub min_price: Decimal,
    pub max_price: Decimal,
}

impl PriceBand {
    /// Band of `band_bps` basis points either side of `reference`
    pub fn around(reference: Price, band_bps: u32) -> Self {
        let reference = reference.as_decimal();
        let delta = reference * Decimal::from(band_bps) / Decimal::from(10_000);
        Self {
            min_price: reference - delta,
            max_price: reference + delta,
        }
    }

    pub fn contains(&self, price: Price) -> bool {
        let price = price.as_decimal();
        self.min_price <= price && price <= self.max_price
    }
}

/// Closed batch ready for submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementBatch {
    pub id: BatchId,
    pub market_id: MarketId,
    pub fills: Vec<Trade>,
    /// Timestamp of the reference price used for the band
    pub oracle_ts: DateTime<Utc>,
    pub reference_price: Price,
    pub band: PriceBand,
    pub expiry: DateTime<Utc>,
    /// Submission attempt, starting at 1
    pub attempt: u32,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
}

impl SettlementBatch {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    pub fn trade_ids(&self) -> Vec<TradeId> {
        self.fills.iter().map(|t| t.id).collect()
    }

    /// First fill outside the band, if any
    pub fn first_out_of_band(&self) -> Option<&Trade> {
        self.fills.iter().find(|t| !self.band.contains(t.price))
    }
}
