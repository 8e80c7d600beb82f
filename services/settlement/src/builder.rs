//! Settlement batch builder
//!
//! Accumulates one market's fills and closes them into batches stamped with
//! a reference price band. A flush that would put an out-of-band fill into a
//! batch fails and keeps every fill queued.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use types::ids::{BatchId, MarketId};
use types::settlement::{BatchStatus, PriceBand, SettlementBatch};
use types::trade::Trade;

use crate::error::SettlementError;
use crate::oracle::ReferencePrice;

/// Tunables for batch construction
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPolicy {
    /// Fills per batch; 1 gives one batch per fill
    pub max_fills: usize,
    /// Time a fill may wait before its batch is flushed
    pub window: Duration,
    /// Half-width of the price band around the reference, in basis points
    pub band_bps: u32,
    /// Batch expiry after build
    pub validity: Duration,
    /// Oldest acceptable reference price
    pub max_reference_age: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_fills: 50,
            window: Duration::seconds(2),
            band_bps: 500,
            validity: Duration::seconds(60),
            max_reference_age: Duration::seconds(30),
        }
    }
}

#[derive(Debug)]
pub struct BatchBuilder {
    market_id: MarketId,
    policy: BatchPolicy,
    pending: VecDeque<Trade>,
    /// When the oldest pending fill arrived
    opened_at: Option<DateTime<Utc>>,
}

impl BatchBuilder {
    pub fn new(market_id: MarketId, policy: BatchPolicy) -> Self {
        Self {
            market_id,
            policy,
            pending: VecDeque::new(),
            opened_at: None,
        }
    }

    pub fn market_id(&self) -> MarketId {
        self.market_id
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    pub fn append(&mut self, fill: Trade, now: DateTime<Utc>) -> Result<(), SettlementError> {
        if fill.market_id != self.market_id {
            return Err(SettlementError::WrongMarket {
                expected: self.market_id.as_u64(),
                got: fill.market_id.as_u64(),
            });
        }
        self.opened_at.get_or_insert(now);
        self.pending.push_back(fill);
        Ok(())
    }

    /// Put fills of an unsettled batch back in front, keeping their order
    pub fn requeue(&mut self, fills: Vec<Trade>, now: DateTime<Utc>) {
        for fill in fills.into_iter().rev() {
            self.pending.push_front(fill);
        }
        if !self.pending.is_empty() {
            self.opened_at.get_or_insert(now);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn should_flush(&self, now: DateTime<Utc>) -> bool {
        if self.pending.len() >= self.policy.max_fills {
            return true;
        }
        match self.opened_at {
            Some(opened) => !self.pending.is_empty() && opened + self.policy.window <= now,
            None => false,
        }
    }

    /// Close up to `max_fills` pending fills into a batch
    ///
    /// Returns `Ok(None)` when nothing is pending.
    pub fn flush(
        &mut self,
        reference: &ReferencePrice,
        now: DateTime<Utc>,
    ) -> Result<Option<SettlementBatch>, SettlementError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let band = checked_band(self.market_id, reference, &self.policy, now)?;

        let take = self.pending.len().min(self.policy.max_fills.max(1));
        if let Some(bad) = self.pending.iter().take(take).find(|t| !band.contains(t.price)) {
            return Err(out_of_band(bad, &band));
        }

        let fills: Vec<Trade> = self.pending.drain(..take).collect();
        self.opened_at = if self.pending.is_empty() { None } else { Some(now) };

        Ok(Some(SettlementBatch {
            id: BatchId::new(),
            market_id: self.market_id,
            fills,
            oracle_ts: reference.timestamp,
            reference_price: reference.price,
            band,
            expiry: now + self.policy.validity,
            attempt: 1,
            status: BatchStatus::Pending,
            created_at: now,
        }))
    }
}

/// Rebuild a rejected batch for another attempt
///
/// Same id and fills; fresh reference, band and expiry. Fails closed on the
/// same checks as [`BatchBuilder::flush`].
pub fn refresh(
    batch: &SettlementBatch,
    reference: &ReferencePrice,
    policy: &BatchPolicy,
    now: DateTime<Utc>,
) -> Result<SettlementBatch, SettlementError> {
    let band = checked_band(batch.market_id, reference, policy, now)?;
    if let Some(bad) = batch.fills.iter().find(|t| !band.contains(t.price)) {
        return Err(out_of_band(bad, &band));
    }
    Ok(SettlementBatch {
        oracle_ts: reference.timestamp,
        reference_price: reference.price,
        band,
        expiry: now + policy.validity,
        attempt: batch.attempt + 1,
        status: BatchStatus::Pending,
        ..batch.clone()
    })
}

fn checked_band(
    market_id: MarketId,
    reference: &ReferencePrice,
    policy: &BatchPolicy,
    now: DateTime<Utc>,
) -> Result<PriceBand, SettlementError> {
    let age = now - reference.timestamp;
    if age > policy.max_reference_age {
        return Err(SettlementError::StaleReference {
            market_id: market_id.as_u64(),
            age_secs: age.num_seconds(),
        });
    }
    Ok(PriceBand::around(reference.price, policy.band_bps))
}

fn out_of_band(fill: &Trade, band: &PriceBand) -> SettlementError {
    SettlementError::PriceOutOfBand {
        trade_id: fill.id.to_string(),
        price: fill.price.to_string(),
        min_price: band.min_price.to_string(),
        max_price: band.max_price.to_string(),
    }
}
