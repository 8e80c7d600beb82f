//! Recovery: rebuild engine state from replayed store records
//!
//! Records are folded in journal order. The result answers the questions a
//! restarting process asks: which orders rest in which book, where the
//! sequence counters must resume, which freeze quotes are still open, and
//! which fills still need to reach the settlement service.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::warn;
use types::freeze::{FreezeQuote, FreezeState};
use types::ids::{BatchId, MarketId, OrderId, TradeId};
use types::order::{Order, TimeInForce};
use types::settlement::{BatchStatus, SettlementBatch};
use types::trade::Trade;

use crate::store::StoreRecord;

/// A lock transaction that already backed an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentTransaction {
    pub tx_hash: String,
    pub order_id: OrderId,
    /// Issue time of the quote it confirmed
    pub quoted_at: DateTime<Utc>,
}

/// State folded from the journal
#[derive(Debug, Default)]
pub struct RecoveredState {
    /// Latest version of every order ever admitted
    pub orders: HashMap<OrderId, Order>,
    /// Every fill, in journal order
    pub trades: Vec<Trade>,
    /// Quotes issued and not yet closed (may be expired)
    pub quotes: HashMap<OrderId, FreezeQuote>,
    /// Quotes closed as expired, with their expiry
    pub expired_quotes: HashMap<OrderId, DateTime<Utc>>,
    /// Lock transactions keyed by lower-cased hash
    pub spent_transactions: HashMap<String, SpentTransaction>,
    /// Latest state of every batch
    pub batches: HashMap<BatchId, SettlementBatch>,
    batch_of_trade: HashMap<TradeId, BatchId>,
    pub last_sequence: u64,
    pub corrupted_entries: usize,
}

impl RecoveredState {
    pub fn apply(&mut self, record: StoreRecord) {
        match record {
            StoreRecord::OrderUpserted(order) => {
                self.orders.insert(order.id, order);
            }
            StoreRecord::TradeRecorded(trade) => {
                self.trades.push(trade);
            }
            StoreRecord::QuoteIssued(quote) => {
                self.quotes.insert(quote.order_id, quote);
            }
            StoreRecord::QuoteClosed {
                order_id,
                state,
                tx_hash,
            } => self.close_quote(order_id, state, tx_hash),
            StoreRecord::BatchBuilt(batch) => {
                for trade in &batch.fills {
                    self.batch_of_trade.insert(trade.id, batch.id);
                }
                self.batches.insert(batch.id, batch);
            }
            StoreRecord::BatchSubmitted { batch_id, attempt } => {
                self.set_status(batch_id, BatchStatus::Submitted, Some(attempt));
            }
            StoreRecord::BatchSettled { batch_id, .. } => {
                self.set_status(batch_id, BatchStatus::Settled, None);
            }
            StoreRecord::BatchFailed { batch_id, attempt, .. } => {
                self.set_status(batch_id, BatchStatus::Failed, Some(attempt));
            }
            StoreRecord::ReconciliationRequired { batch_id, .. } => {
                self.set_status(batch_id, BatchStatus::NeedsReconciliation, None);
            }
        }
    }

    fn close_quote(&mut self, order_id: OrderId, state: FreezeState, tx_hash: Option<String>) {
        let Some(quote) = self.quotes.remove(&order_id) else {
            warn!(%order_id, %state, "close record for unknown quote");
            return;
        };
        if state == FreezeState::Expired {
            self.expired_quotes.insert(order_id, quote.expires_at);
        }
        if let Some(tx_hash) = tx_hash {
            let tx_hash = tx_hash.to_ascii_lowercase();
            self.spent_transactions.insert(
                tx_hash.clone(),
                SpentTransaction {
                    tx_hash,
                    order_id,
                    quoted_at: quote.created_at,
                },
            );
        }
    }

    fn set_status(&mut self, batch_id: BatchId, status: BatchStatus, attempt: Option<u32>) {
        match self.batches.get_mut(&batch_id) {
            Some(batch) => {
                batch.status = status;
                if let Some(attempt) = attempt {
                    batch.attempt = attempt;
                }
            }
            None => warn!(%batch_id, ?status, "status record for unknown batch"),
        }
    }

    /// GTC limit orders still live in `market_id`, in admission order
    pub fn resting_orders(&self, market_id: MarketId) -> Vec<Order> {
        let mut resting: Vec<Order> = self
            .orders
            .values()
            .filter(|o| {
                o.market_id == market_id
                    && !o.is_terminal()
                    && o.sequence > 0
                    && o.limit_price().is_some()
                    && o.time_in_force == TimeInForce::GTC
            })
            .cloned()
            .collect();
        resting.sort_by_key(|o| o.sequence);
        resting
    }

    /// Highest admission sequence issued in `market_id`
    pub fn max_order_sequence(&self, market_id: MarketId) -> u64 {
        self.orders
            .values()
            .filter(|o| o.market_id == market_id)
            .map(|o| o.sequence)
            .max()
            .unwrap_or(0)
    }

    /// Highest trade sequence issued in `market_id`
    pub fn max_trade_sequence(&self, market_id: MarketId) -> u64 {
        self.trades_for(market_id).map(|t| t.sequence).max().unwrap_or(0)
    }

    pub fn trades_for(&self, market_id: MarketId) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(move |t| t.market_id == market_id)
    }

    /// Open quotes still confirmable at `now`
    pub fn live_quotes(&self, now: DateTime<Utc>) -> Vec<FreezeQuote> {
        let mut quotes: Vec<FreezeQuote> = self
            .quotes
            .values()
            .filter(|q| !q.is_expired_at(now))
            .cloned()
            .collect();
        quotes.sort_by_key(|q| q.created_at);
        quotes
    }

    /// Open quotes that lapsed while the process was down
    pub fn lapsed_quotes(&self, now: DateTime<Utc>) -> Vec<FreezeQuote> {
        self.quotes
            .values()
            .filter(|q| q.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Fills that must be (re)submitted, in journal order
    ///
    /// A fill is pending when it was never batched, or its latest batch was
    /// built but never sent, or was definitely rejected.
    pub fn unsettled_trades(&self) -> Vec<Trade> {
        self.trades
            .iter()
            .filter(|t| match self.batch_of_trade.get(&t.id) {
                None => true,
                Some(batch_id) => self
                    .batches
                    .get(batch_id)
                    .map_or(true, |b| matches!(b.status, BatchStatus::Pending | BatchStatus::Failed)),
            })
            .cloned()
            .collect()
    }

    /// Batches whose outcome is unknown
    ///
    /// A batch left `Submitted` by a crash may or may not have been applied,
    /// so it is treated exactly like an explicit reconciliation event.
    pub fn reconciliation_batches(&self) -> Vec<&SettlementBatch> {
        let mut batches: Vec<&SettlementBatch> = self
            .batches
            .values()
            .filter(|b| matches!(b.status, BatchStatus::Submitted | BatchStatus::NeedsReconciliation))
            .collect();
        batches.sort_by_key(|b| b.created_at);
        batches
    }
}
