//! Table of outstanding freeze quotes

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use types::freeze::FreezeQuote;
use types::ids::OrderId;

/// Quotes awaiting confirmation, plus what has to outlive them
///
/// Expired quotes leave a tombstone so a late confirm still reads as
/// expired, and spent lock transactions are remembered so one transaction
/// backs one order. Both are dropped by [`QuoteBook::prune`] once older than
/// the retention window.
#[derive(Debug, Default)]
pub struct QuoteBook {
    quotes: DashMap<OrderId, FreezeQuote>,
    /// Expired quote -> its expiry
    expired: DashMap<OrderId, DateTime<Utc>>,
    /// Confirmation hash -> (order it backs, when that order was quoted)
    spent: DashMap<String, (OrderId, DateTime<Utc>)>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, quote: FreezeQuote) {
        self.quotes.insert(quote.order_id, quote);
    }

    /// Remove a quote for confirmation; only one caller can win it
    pub fn take(&self, order_id: &OrderId) -> Option<FreezeQuote> {
        self.quotes.remove(order_id).map(|(_, quote)| quote)
    }

    pub fn get(&self, order_id: &OrderId) -> Option<FreezeQuote> {
        self.quotes.get(order_id).map(|q| q.clone())
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Drop every quote whose validity ended, returning them
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<FreezeQuote> {
        let expired: Vec<OrderId> = self
            .quotes
            .iter()
            .filter(|q| q.is_expired_at(now))
            .map(|q| q.order_id)
            .collect();
        expired.iter().filter_map(|id| self.take(id)).collect()
    }

    pub fn mark_expired(&self, order_id: OrderId, expires_at: DateTime<Utc>) {
        self.expired.insert(order_id, expires_at);
    }

    /// Expiry of a quote that lapsed, while it is still remembered
    pub fn expired_at(&self, order_id: &OrderId) -> Option<DateTime<Utc>> {
        self.expired.get(order_id).map(|at| *at)
    }

    /// Bind a confirmation transaction to one order
    ///
    /// Returns the order that already holds it, if any.
    pub fn claim_transaction(&self, tx_hash: &str, order_id: OrderId, quoted_at: DateTime<Utc>) -> Result<(), OrderId> {
        match self.spent.entry(tx_hash.to_ascii_lowercase()) {
            Entry::Occupied(e) if e.get().0 != order_id => Err(e.get().0),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(e) => {
                e.insert((order_id, quoted_at));
                Ok(())
            }
        }
    }

    /// Undo a claim whose confirmation did not go through
    pub fn release_transaction(&self, tx_hash: &str, order_id: OrderId) {
        self.spent
            .remove_if(&tx_hash.to_ascii_lowercase(), |_, (owner, _)| *owner == order_id);
    }

    pub fn spent_len(&self) -> usize {
        self.spent.len()
    }

    /// Forget tombstones and spent transactions older than `retention`
    pub fn prune(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let cutoff = now - retention;
        let before = self.expired.len() + self.spent.len();
        self.expired.retain(|_, expires_at| *expires_at > cutoff);
        self.spent.retain(|_, (_, quoted_at)| *quoted_at > cutoff);
        before - (self.expired.len() + self.spent.len())
    }
}
