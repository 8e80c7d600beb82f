//! Per-market serialization point
//!
//! Each market has one async mutex around its engine. A mutation holds it
//! from admission through matching, journaling and publishing, so events
//! leave in the order the book changed. Nothing in here does network I/O.

use chrono::{DateTime, Utc};
use market_data::{MarketSummary, PublicTrade, StreamPublisher, TradeTape};
use matching_engine::{BookSnapshot, EngineEvent, MarketEngine, MarketRegistry};
use persistence::{EngineStore, RecoveredState, StoreRecord};
use serde::Serialize;
use settlement::{PriceCache, SettlementHandle};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};
use types::errors::{EngineError, OrderError};
use types::ids::{MarketId, OrderId};
use types::numeric::Price;
use types::order::{Order, OrderIntent, Side};
use types::trade::Trade;

use crate::history::History;

struct MarketSlot {
    engine: tokio::sync::Mutex<MarketEngine>,
    tape: Mutex<TradeTape>,
}

/// Liveness of one market worker
#[derive(Debug, Clone, Serialize)]
pub struct MarketHealth {
    pub market_id: MarketId,
    pub symbol: String,
    /// Engine lock was acquired within the probe bound
    pub responsive: bool,
    pub halted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
    pub resting_orders: Option<usize>,
}

impl MarketHealth {
    pub fn is_healthy(&self) -> bool {
        self.responsive && !self.halted
    }
}

/// Result of one admitted order as returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub order: Order,
    pub trades: Vec<Trade>,
}

pub struct Markets {
    registry: Arc<MarketRegistry>,
    slots: BTreeMap<MarketId, MarketSlot>,
    history: Arc<History>,
    publisher: Arc<StreamPublisher>,
    store: Option<Arc<EngineStore>>,
    settlement: Option<SettlementHandle>,
    prices: Option<Arc<PriceCache>>,
}

impl Markets {
    pub fn new(
        registry: Arc<MarketRegistry>,
        history: Arc<History>,
        publisher: Arc<StreamPublisher>,
        trade_history: usize,
    ) -> Self {
        let slots = registry
            .list()
            .map(|config| {
                let slot = MarketSlot {
                    engine: tokio::sync::Mutex::new(MarketEngine::new(config.clone())),
                    tape: Mutex::new(TradeTape::new(config.market_id, trade_history)),
                };
                (config.market_id, slot)
            })
            .collect();
        Self {
            registry,
            slots,
            history,
            publisher,
            store: None,
            settlement: None,
            prices: None,
        }
    }

    pub fn with_store(mut self, store: Arc<EngineStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_settlement(mut self, handle: SettlementHandle) -> Self {
        self.settlement = Some(handle);
        self
    }

    /// Feed every fill into an in-process reference price cache
    pub fn with_price_cache(mut self, prices: Arc<PriceCache>) -> Self {
        self.prices = Some(prices);
        self
    }

    pub fn registry(&self) -> &MarketRegistry {
        &self.registry
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    fn slot(&self, market_id: MarketId) -> Result<&MarketSlot, OrderError> {
        self.slots.get(&market_id).ok_or(OrderError::UnknownMarket {
            market_id: market_id.as_u64(),
        })
    }

    /// Admit a new order straight from an intent
    pub async fn submit_intent(&self, intent: OrderIntent, now: DateTime<Utc>) -> Result<Admission, EngineError> {
        self.submit(Order::from_intent(OrderId::new(), intent, now), now).await
    }

    /// Admit and match one order
    pub async fn submit(&self, order: Order, now: DateTime<Utc>) -> Result<Admission, EngineError> {
        self.registry.get_active(order.market_id)?;
        let slot = self.slot(order.market_id)?;
        let mut engine = slot.engine.lock().await;

        if self.history.get(&order.id).is_some() {
            return Err(OrderError::InvalidParameters(format!("order {} already admitted", order.id)).into());
        }
        let outcome = engine.submit(order, now)?;
        let changed: Vec<Order> = outcome.changed_orders().cloned().collect();
        self.commit(&mut engine, slot, &changed, &outcome.trades, outcome.events, now)?;

        info!(
            market_id = %outcome.order.market_id,
            order_id = %outcome.order.id,
            status = %outcome.order.status,
            trades = outcome.trades.len(),
            "Order admitted"
        );
        Ok(Admission {
            order: outcome.order,
            trades: outcome.trades,
        })
    }

    /// Cancel a resting order
    ///
    /// Runs under the market lock, so an order consumed by an earlier match
    /// is reported as terminal rather than raced.
    pub async fn cancel(&self, order_id: &OrderId, now: DateTime<Utc>) -> Result<Order, EngineError> {
        let known = self.history.get(order_id).ok_or_else(|| not_found(order_id))?;
        let slot = self.slot(known.market_id)?;
        let mut engine = slot.engine.lock().await;

        let current = self.history.get(order_id).ok_or_else(|| not_found(order_id))?;
        if current.is_terminal() {
            return Err(OrderError::NotCancellable {
                order_id: order_id.to_string(),
                status: current.status.to_string(),
            }
            .into());
        }

        let outcome = engine.cancel(order_id, now)?;
        self.commit(&mut engine, slot, &outcome.orders, &[], outcome.events, now)?;
        outcome.orders.into_iter().next().ok_or_else(|| not_found(order_id))
    }

    /// Expire due resting orders in every market; returns how many
    pub async fn expire_due(&self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for slot in self.slots.values() {
            let mut engine = slot.engine.lock().await;
            let outcome = engine.expire_due(now);
            if outcome.orders.is_empty() {
                continue;
            }
            expired += outcome.orders.len();
            if let Err(e) = self.commit(&mut engine, slot, &outcome.orders, &[], outcome.events, now) {
                error!(market_id = %engine.config().market_id, error = %e, "Expiry not journaled");
            }
        }
        expired
    }

    pub async fn snapshot(&self, market_id: MarketId, depth: usize) -> Result<BookSnapshot, OrderError> {
        let slot = self.slot(market_id)?;
        let engine = slot.engine.lock().await;
        Ok(engine.snapshot(depth))
    }

    pub fn recent_trades(&self, market_id: MarketId, limit: usize) -> Result<Vec<PublicTrade>, OrderError> {
        let slot = self.slot(market_id)?;
        let tape = slot.tape.lock().unwrap_or_else(|p| p.into_inner());
        Ok(tape.recent(limit))
    }

    pub fn summary(&self, market_id: MarketId, now: DateTime<Utc>) -> Result<MarketSummary, OrderError> {
        let config = self.registry.get(market_id)?;
        let slot = self.slot(market_id)?;
        let tape = slot.tape.lock().unwrap_or_else(|p| p.into_inner());
        Ok(tape.summary(&config.symbol, now))
    }

    /// Price a market order would be margined at when no oracle answers:
    /// the last trade, else the best opposite quote
    pub async fn fallback_mark(&self, market_id: MarketId, side: Side) -> Result<Option<Price>, OrderError> {
        let slot = self.slot(market_id)?;
        let last = slot.tape.lock().unwrap_or_else(|p| p.into_inner()).last_price();
        if last.is_some() {
            return Ok(last);
        }
        let engine = slot.engine.lock().await;
        let best = match side {
            Side::Buy => engine.book().best_ask(),
            Side::Sell => engine.book().best_bid(),
        };
        Ok(best.map(|level| level.price))
    }

    /// Try each market lock within `bound`; a held or halted market reports unhealthy
    pub async fn probe(&self, bound: Duration) -> Vec<MarketHealth> {
        let mut report = Vec::with_capacity(self.slots.len());
        for (market_id, slot) in &self.slots {
            let symbol = self
                .registry
                .get(*market_id)
                .map(|c| c.symbol.clone())
                .unwrap_or_default();
            let health = match tokio::time::timeout(bound, slot.engine.lock()).await {
                Ok(engine) => MarketHealth {
                    market_id: *market_id,
                    symbol,
                    responsive: true,
                    halted: engine.is_halted(),
                    halt_reason: engine.halt_reason().map(str::to_string),
                    resting_orders: Some(engine.book().order_count()),
                },
                Err(_) => MarketHealth {
                    market_id: *market_id,
                    symbol,
                    responsive: false,
                    halted: false,
                    halt_reason: None,
                    resting_orders: None,
                },
            };
            report.push(health);
        }
        report
    }

    /// Rebuild books, fee volume, sequences, tapes and history from the journal
    pub async fn restore(&self, recovered: &RecoveredState) -> Result<(), EngineError> {
        for order in recovered.orders.values() {
            self.history.upsert(order);
        }
        for trade in &recovered.trades {
            self.history.record_trade(trade);
            if let Some(prices) = &self.prices {
                prices.observe_trade(trade);
            }
        }

        for (market_id, slot) in &self.slots {
            let mut engine = slot.engine.lock().await;
            {
                let mut tape = slot.tape.lock().unwrap_or_else(|p| p.into_inner());
                for trade in recovered.trades_for(*market_id) {
                    engine.replay_fill(trade);
                    tape.record(trade);
                }
            }
            let resting = recovered.resting_orders(*market_id);
            let count = resting.len();
            for order in resting {
                engine.restore_resting(order)?;
            }
            engine.resume_sequence_past(recovered.max_order_sequence(*market_id));
            info!(market_id = %market_id, resting = count, "Market restored");
        }
        Ok(())
    }

    /// Journal, index and publish the effects of one engine mutation
    ///
    /// Runs with the engine lock held. If the journal write fails the market
    /// is suspended: the change already happened in memory and is still
    /// published, but no further matching runs on state that is not durable.
    fn commit(
        &self,
        engine: &mut MarketEngine,
        slot: &MarketSlot,
        orders: &[Order],
        trades: &[Trade],
        events: Vec<EngineEvent>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let journaled = match &self.store {
            Some(store) => {
                let records: Vec<StoreRecord> = trades
                    .iter()
                    .cloned()
                    .map(StoreRecord::TradeRecorded)
                    .chain(orders.iter().cloned().map(StoreRecord::OrderUpserted))
                    .collect();
                store.append_all(&records, now)
            }
            None => Ok(()),
        };

        for order in orders {
            self.history.upsert(order);
        }
        if !trades.is_empty() {
            let mut tape = slot.tape.lock().unwrap_or_else(|p| p.into_inner());
            for trade in trades {
                self.history.record_trade(trade);
                tape.record(trade);
                if let Some(prices) = &self.prices {
                    prices.observe_trade(trade);
                }
            }
        }
        self.publisher.publish(events, now);

        if !trades.is_empty() {
            if let Some(settlement) = &self.settlement {
                if !settlement.enqueue(trades.iter().cloned()) {
                    warn!(market_id = %engine.config().market_id, fills = trades.len(), "Settlement queue closed");
                }
            }
        }

        journaled.map_err(|e| {
            engine.suspend(format!("journal write failed: {}", e));
            EngineError::Storage { message: e.to_string() }
        })
    }
}

fn not_found(order_id: &OrderId) -> EngineError {
    OrderError::NotFound {
        order_id: order_id.to_string(),
    }
    .into()
}
