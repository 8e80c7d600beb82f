//! Matching engine core
//!
//! One [`MarketEngine`] per market. Every method is a complete, synchronous
//! mutation; the caller serializes access (one in-flight mutation per
//! market) and performs any external I/O before or after, never during.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use types::errors::{EngineError, OrderError};
use types::ids::OrderId;
use types::market::MarketConfig;
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderKind, OrderStatus, Side, TimeInForce};
use types::trade::Trade;

use crate::book::{BookSnapshot, OrderBook};
use crate::events::{EngineEvent, LevelDelta};
use crate::matching::{crossing, policy, MatchExecutor};
use crate::positions::PositionLedger;

/// Result of admitting one order
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Final state of the incoming order
    pub order: Order,
    pub trades: Vec<Trade>,
    /// Maker orders touched by this match, in fill order
    pub maker_updates: Vec<Order>,
    pub events: Vec<EngineEvent>,
}

impl SubmitOutcome {
    /// Every order record changed by the operation, taker last
    pub fn changed_orders(&self) -> impl Iterator<Item = &Order> {
        self.maker_updates.iter().chain(std::iter::once(&self.order))
    }
}

/// Result of removing resting orders (cancel or expiry)
#[derive(Debug, Clone, Default)]
pub struct RemovalOutcome {
    pub orders: Vec<Order>,
    pub events: Vec<EngineEvent>,
}

/// Price levels touched during one operation, in first-touch order
#[derive(Debug, Default)]
struct TouchedLevels(Vec<(Side, Price)>);

impl TouchedLevels {
    fn record(&mut self, side: Side, price: Price) {
        if !self.0.contains(&(side, price)) {
            self.0.push((side, price));
        }
    }

    fn into_events(self, book: &OrderBook) -> impl Iterator<Item = EngineEvent> + '_ {
        let market_id = book.market_id();
        self.0.into_iter().map(move |(side, price)| {
            let (size, order_count) = book
                .level_at(side, price)
                .map(|l| (l.size, l.order_count))
                .unwrap_or((Quantity::zero(), 0));
            EngineEvent::BookDelta(LevelDelta {
                market_id,
                side,
                price,
                size,
                order_count,
            })
        })
    }
}

/// Order book plus matching state of a single market
#[derive(Debug, Clone)]
pub struct MarketEngine {
    config: MarketConfig,
    book: OrderBook,
    executor: MatchExecutor,
    positions: PositionLedger,
    /// Next admission sequence; never reused
    next_sequence: u64,
    halted: Option<String>,
}

impl MarketEngine {
    pub fn new(config: MarketConfig) -> Self {
        Self {
            book: OrderBook::new(&config),
            executor: MatchExecutor::new(1, config.fee_tiers.clone()),
            positions: PositionLedger::new(),
            next_sequence: 1,
            halted: None,
            config,
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn positions(&self) -> &PositionLedger {
        &self.positions
    }

    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        self.book.snapshot(depth)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Admission sequence the next order will receive
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn next_trade_sequence(&self) -> u64 {
        self.executor.peek_sequence()
    }

    /// Validate, admit and match one order
    ///
    /// Validation and policy failures return before any book mutation.
    pub fn submit(&mut self, mut order: Order, now: DateTime<Utc>) -> Result<SubmitOutcome, EngineError> {
        self.ensure_live()?;
        self.validate(&order, now)?;
        policy::check_pre_match(&self.book, &order, &self.positions)?;

        order.sequence = self.next_sequence;
        self.next_sequence += 1;
        order.updated_at = now;

        let market_id = self.config.market_id;
        let mut touched = TouchedLevels::default();
        let mut trades = Vec::new();
        let mut maker_updates = Vec::new();
        let mut events = Vec::new();

        while !order.remaining().is_zero() {
            let Some((price, _, maker_id, maker_remaining)) = self.book.best_opposite(order.side) else {
                break;
            };
            if !crossing::incoming_can_match(order.side, order.limit_price(), price) {
                break;
            }

            let fill = if order.remaining() <= maker_remaining {
                order.remaining()
            } else {
                maker_remaining
            };

            let maker = match self.book.fill_resting(&maker_id, fill, now) {
                Ok(maker) => maker,
                Err(e) => return Err(self.halt(e)),
            };
            if let Err(e) = order.add_fill(fill, now) {
                return Err(self.halt(e.into()));
            }
            let trade = match self.executor.execute_trade(market_id, &maker, &order, price, fill, now) {
                Ok(trade) => trade,
                Err(e) => {
                    return Err(self.halt(EngineError::InvariantViolation {
                        market_id: market_id.as_u64(),
                        detail: e.to_string(),
                    }))
                }
            };

            self.positions.apply(&trade);
            touched.record(order.side.opposite(), price);
            events.push(EngineEvent::Trade(trade.clone()));
            trades.push(trade);
            maker_updates.push(maker);
        }
        for trade in &trades {
            self.executor.record_volume(trade);
        }

        if !order.remaining().is_zero() {
            match (order.kind, order.time_in_force) {
                (OrderKind::Limit { price }, TimeInForce::GTC) => {
                    if let Err(e) = self.book.insert(order.clone()) {
                        return Err(self.halt(e.into()));
                    }
                    touched.record(order.side, price);
                }
                // IOC, FOK and market remainders never rest
                _ => order.cancel(now)?,
            }
        }
        self.book.touch(now);

        if self.book.is_crossed() {
            self.halt(EngineError::InvariantViolation {
                market_id: market_id.as_u64(),
                detail: "book crossed after match".to_string(),
            });
        }
        if let Some(bad) = maker_updates
            .iter()
            .chain(std::iter::once(&order))
            .find(|o| !o.check_invariant())
        {
            self.halt(EngineError::InvariantViolation {
                market_id: market_id.as_u64(),
                detail: format!("order {} fill state inconsistent", bad.id),
            });
        }

        events.extend(touched.into_events(&self.book));
        events.extend(maker_updates.iter().cloned().map(EngineEvent::OrderUpdate));
        events.push(EngineEvent::OrderUpdate(order.clone()));

        debug!(
            market_id = %market_id,
            order_id = %order.id,
            sequence = order.sequence,
            trades = trades.len(),
            status = %order.status,
            "Order processed"
        );

        Ok(SubmitOutcome {
            order,
            trades,
            maker_updates,
            events,
        })
    }

    /// Cancel a resting order
    ///
    /// Orders no longer resting (filled, cancelled, expired, never admitted)
    /// are reported as not found; the caller tells terminal from unknown.
    pub fn cancel(&mut self, order_id: &OrderId, now: DateTime<Utc>) -> Result<RemovalOutcome, EngineError> {
        let mut order = self.book.remove(order_id)?;
        order.cancel(now)?;
        self.book.touch(now);

        let mut touched = TouchedLevels::default();
        if let Some(price) = order.limit_price() {
            touched.record(order.side, price);
        }
        let mut events: Vec<EngineEvent> = touched.into_events(&self.book).collect();
        events.push(EngineEvent::OrderUpdate(order.clone()));

        info!(market_id = %self.config.market_id, order_id = %order.id, "Order cancelled");
        Ok(RemovalOutcome {
            orders: vec![order],
            events,
        })
    }

    /// Remove every resting order whose expiry has passed
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> RemovalOutcome {
        let due = self.book.expired(now);
        if due.is_empty() {
            return RemovalOutcome::default();
        }

        let mut touched = TouchedLevels::default();
        let mut orders = Vec::with_capacity(due.len());
        for order_id in due {
            let Ok(mut order) = self.book.remove(&order_id) else {
                continue;
            };
            if let Err(e) = order.expire(now) {
                warn!(order_id = %order_id, error = %e, "Skipping expiry of terminal order");
                continue;
            }
            if let Some(price) = order.limit_price() {
                touched.record(order.side, price);
            }
            orders.push(order);
        }
        self.book.touch(now);

        let mut events: Vec<EngineEvent> = touched.into_events(&self.book).collect();
        events.extend(orders.iter().cloned().map(EngineEvent::OrderUpdate));
        info!(market_id = %self.config.market_id, expired = orders.len(), "Expired resting orders");
        RemovalOutcome { orders, events }
    }

    /// Put a recovered resting order back without matching it
    pub fn restore_resting(&mut self, order: Order) -> Result<(), EngineError> {
        if order.market_id != self.config.market_id {
            return Err(OrderError::InvalidParameters(format!(
                "order {} belongs to market {}",
                order.id, order.market_id
            ))
            .into());
        }
        let sequence = order.sequence;
        self.book.insert(order)?;
        if sequence >= self.next_sequence {
            self.next_sequence = sequence + 1;
        }
        Ok(())
    }

    /// Fold a recovered fill into positions, fee volume and the trade sequence
    pub fn replay_fill(&mut self, trade: &Trade) {
        self.positions.apply(trade);
        self.executor.record_volume(trade);
        self.executor.resume_past(trade.sequence);
    }

    /// Move the admission sequence past a value already handed out
    pub fn resume_sequence_past(&mut self, issued: u64) {
        if issued >= self.next_sequence {
            self.next_sequence = issued + 1;
        }
    }

    /// Refuse further matching for a cause found outside the engine
    pub fn suspend(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(market_id = %self.config.market_id, %reason, "Market suspended");
        self.halted.get_or_insert(reason);
    }

    /// Operator action: re-enable matching once the book checks out
    pub fn clear_halt(&mut self) -> Result<(), EngineError> {
        self.book
            .check_integrity()
            .map_err(|detail| EngineError::InvariantViolation {
                market_id: self.config.market_id.as_u64(),
                detail,
            })?;
        if let Some(reason) = self.halted.take() {
            warn!(market_id = %self.config.market_id, %reason, "Market halt cleared");
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        match &self.halted {
            Some(reason) => Err(EngineError::MarketHalted {
                market_id: self.config.market_id.as_u64(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Record an invariant violation and refuse further matching
    fn halt(&mut self, cause: EngineError) -> EngineError {
        error!(
            market_id = %self.config.market_id,
            error = %cause,
            "Invariant violated, halting market"
        );
        if self.halted.is_none() {
            self.halted = Some(cause.to_string());
        }
        cause
    }

    fn validate(&self, order: &Order, now: DateTime<Utc>) -> Result<(), OrderError> {
        if order.market_id != self.config.market_id {
            return Err(OrderError::UnknownMarket {
                market_id: order.market_id.as_u64(),
            });
        }
        if !self.config.active {
            return Err(OrderError::InvalidParameters(format!(
                "market {} is not accepting orders",
                self.config.market_id
            )));
        }
        if order.status != OrderStatus::Pending || !order.filled_size.is_zero() {
            return Err(OrderError::InvalidParameters(format!(
                "order {} is not a fresh pending order",
                order.id
            )));
        }
        if self.book.contains(&order.id) {
            return Err(OrderError::InvalidParameters(format!(
                "order {} already admitted",
                order.id
            )));
        }
        if let Some(price) = order.limit_price() {
            self.config.validate_price(price)?;
        }
        self.config.validate_size(order.size)?;
        if order.is_expired_at(now) {
            return Err(OrderError::InvalidParameters(
                "expires_at is in the past".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::ids::{MarketId, UserAddress};
    use types::order::{OrderFlags, OrderIntent};

    fn engine() -> MarketEngine {
        let mut config = MarketConfig::btc_usdc();
        config.tick_size = Decimal::ONE;
        config.lot_size = Decimal::ONE;
        config.min_size = Decimal::ONE;
        MarketEngine::new(config)
    }

    fn order(user: &str, side: Side, kind: OrderKind, size: u64, tif: TimeInForce) -> Order {
        let intent = OrderIntent {
            user_address: UserAddress::try_new(user).unwrap(),
            market_id: MarketId::new(1),
            side,
            kind,
            size: Quantity::from_u64(size),
            time_in_force: tif,
            flags: OrderFlags::default(),
            expires_at: None,
        };
        Order::from_intent(OrderId::new(), intent, Utc::now())
    }

    fn limit(user: &str, side: Side, price: u64, size: u64) -> Order {
        order(user, side, OrderKind::Limit { price: Price::from_u64(price) }, size, TimeInForce::GTC)
    }

    fn market(user: &str, side: Side, size: u64) -> Order {
        order(user, side, OrderKind::Market, size, TimeInForce::IOC)
    }

    #[test]
    fn test_engine_resting_order() {
        let mut engine = engine();
        let outcome = engine.submit(limit("0xa", Side::Buy, 100, 1), Utc::now()).unwrap();

        assert!(outcome.trades.is_empty());
        assert_eq!(outcome.order.status, OrderStatus::Pending);
        assert_eq!(outcome.order.sequence, 1);
        assert_eq!(engine.book().best_bid().unwrap().price, Price::from_u64(100));
    }

    #[test]
    fn test_price_time_priority() {
        let mut engine = engine();
        let first = engine.submit(limit("0xa", Side::Buy, 100, 5), Utc::now()).unwrap().order;
        let second = engine.submit(limit("0xb", Side::Buy, 100, 3), Utc::now()).unwrap().order;

        let outcome = engine.submit(market("0xc", Side::Sell, 6), Utc::now()).unwrap();

        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.trades[0].maker_order_id, first.id);
        assert_eq!(outcome.trades[0].size, Quantity::from_u64(5));
        assert_eq!(outcome.trades[1].maker_order_id, second.id);
        assert_eq!(outcome.trades[1].size, Quantity::from_u64(1));
        assert_eq!(outcome.order.status, OrderStatus::Filled);

        let rest = engine.book().get(&second.id).unwrap();
        assert_eq!(rest.filled_size, Quantity::from_u64(1));
        assert_eq!(rest.status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn test_fee_tier_fixed_for_whole_order() {
        let mut engine = engine();
        engine.submit(limit("0xm1", Side::Sell, 50000, 20), Utc::now()).unwrap();
        engine.submit(limit("0xm2", Side::Sell, 50000, 20), Utc::now()).unwrap();

        // The first fill alone reaches the 1M tier; the second still pays tier 0
        let outcome = engine.submit(market("0xt", Side::Buy, 40), Utc::now()).unwrap();
        assert_eq!(outcome.trades.len(), 2);
        assert!(outcome.trades.iter().all(|t| t.fee_bps == 5 && t.maker_fee_bps == 2));

        engine.submit(limit("0xm1", Side::Sell, 50000, 1), Utc::now()).unwrap();
        let next = engine.submit(market("0xt", Side::Buy, 1), Utc::now()).unwrap();
        assert_eq!(next.trades[0].fee_bps, 4);
        assert_eq!(next.trades[0].maker_fee_bps, 1);
    }

    #[test]
    fn test_trade_at_maker_price_and_no_cross() {
        let mut engine = engine();
        engine.submit(limit("0xa", Side::Buy, 100, 1), Utc::now()).unwrap();
        let outcome = engine.submit(limit("0xb", Side::Sell, 99, 1), Utc::now()).unwrap();

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].price, Price::from_u64(100));
        assert!(engine.book().best_bid().is_none());
        assert!(engine.book().best_ask().is_none());
    }

    #[test]
    fn test_gtc_remainder_rests() {
        let mut engine = engine();
        engine.submit(limit("0xa", Side::Sell, 100, 2), Utc::now()).unwrap();
        let outcome = engine.submit(limit("0xb", Side::Buy, 101, 5), Utc::now()).unwrap();

        assert_eq!(outcome.order.status, OrderStatus::PartiallyFilled);
        assert_eq!(outcome.order.filled_size, Quantity::from_u64(2));
        let bid = engine.book().best_bid().unwrap();
        assert_eq!(bid.price, Price::from_u64(101));
        assert_eq!(bid.size, Quantity::from_u64(3));
        assert!(engine.book().best_ask().is_none());
    }

    #[test]
    fn test_ioc_remainder_cancelled() {
        let mut engine = engine();
        engine.submit(limit("0xa", Side::Sell, 100, 2), Utc::now()).unwrap();
        let ioc = order("0xb", Side::Buy, OrderKind::Limit { price: Price::from_u64(100) }, 5, TimeInForce::IOC);
        let outcome = engine.submit(ioc, Utc::now()).unwrap();

        assert_eq!(outcome.order.status, OrderStatus::Cancelled);
        assert_eq!(outcome.order.filled_size, Quantity::from_u64(2));
        assert!(engine.book().best_bid().is_none());
    }

    #[test]
    fn test_market_order_on_empty_book_is_cancelled() {
        let mut engine = engine();
        let outcome = engine.submit(market("0xa", Side::Buy, 1), Utc::now()).unwrap();
        assert!(outcome.trades.is_empty());
        assert_eq!(outcome.order.status, OrderStatus::Cancelled);
        assert_eq!(engine.book().order_count(), 0);
    }

    #[test]
    fn test_fok_unfillable_leaves_book_untouched() {
        let mut engine = engine();
        engine.submit(limit("0xa", Side::Sell, 100, 2), Utc::now()).unwrap();
        let before = engine.snapshot(10);
        let seq_before = engine.next_sequence();

        let fok = order("0xb", Side::Buy, OrderKind::Limit { price: Price::from_u64(100) }, 5, TimeInForce::FOK);
        let err = engine.submit(fok, Utc::now()).unwrap_err();

        assert_eq!(err.reason_code(), "FOK_UNFILLABLE");
        assert_eq!(engine.snapshot(10), before);
        assert_eq!(engine.next_sequence(), seq_before);
    }

    #[test]
    fn test_fok_fillable_executes_fully() {
        let mut engine = engine();
        engine.submit(limit("0xa", Side::Sell, 100, 2), Utc::now()).unwrap();
        engine.submit(limit("0xa", Side::Sell, 101, 3), Utc::now()).unwrap();

        let fok = order("0xb", Side::Buy, OrderKind::Limit { price: Price::from_u64(101) }, 5, TimeInForce::FOK);
        let outcome = engine.submit(fok, Utc::now()).unwrap();
        assert_eq!(outcome.order.status, OrderStatus::Filled);
        assert_eq!(outcome.trades.len(), 2);
    }

    #[test]
    fn test_post_only_would_cross_rejected() {
        let mut engine = engine();
        engine.submit(limit("0xa", Side::Sell, 100, 1), Utc::now()).unwrap();

        let mut post = limit("0xb", Side::Buy, 100, 1);
        post.flags.post_only = true;
        let err = engine.submit(post, Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "POST_ONLY_WOULD_CROSS");

        let mut passive = limit("0xb", Side::Buy, 99, 1);
        passive.flags.post_only = true;
        assert!(engine.submit(passive, Utc::now()).is_ok());
    }

    #[test]
    fn test_reduce_only_checks_position() {
        let mut engine = engine();
        let mut reduce = limit("0xa", Side::Sell, 100, 1);
        reduce.flags.reduce_only = true;
        let err = engine.submit(reduce, Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "REDUCE_ONLY_VIOLATION");

        // 0xa goes long 2
        engine.submit(limit("0xb", Side::Sell, 100, 2), Utc::now()).unwrap();
        engine.submit(limit("0xa", Side::Buy, 100, 2), Utc::now()).unwrap();

        let mut reduce = limit("0xa", Side::Sell, 105, 2);
        reduce.flags.reduce_only = true;
        assert!(engine.submit(reduce, Utc::now()).is_ok());

        let mut too_big = limit("0xa", Side::Sell, 105, 3);
        too_big.flags.reduce_only = true;
        assert!(engine.submit(too_big, Utc::now()).is_err());
    }

    #[test]
    fn test_reduce_only_counts_resting_reduce_orders() {
        let mut engine = engine();
        engine.submit(limit("0xb", Side::Sell, 100, 2), Utc::now()).unwrap();
        engine.submit(limit("0xa", Side::Buy, 100, 2), Utc::now()).unwrap();

        let mut resting = limit("0xa", Side::Sell, 105, 2);
        resting.flags.reduce_only = true;
        let resting = engine.submit(resting, Utc::now()).unwrap().order;

        // The long of 2 is already spoken for
        let mut second = limit("0xa", Side::Sell, 106, 2);
        second.flags.reduce_only = true;
        let err = engine.submit(second.clone(), Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "REDUCE_ONLY_VIOLATION");

        // A plain sell does not claim the position
        engine.submit(limit("0xa", Side::Sell, 107, 1), Utc::now()).unwrap();
        let err = engine.submit(second.clone(), Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "REDUCE_ONLY_VIOLATION");

        engine.cancel(&resting.id, Utc::now()).unwrap();
        assert!(engine.submit(second, Utc::now()).is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut engine = engine();
        let mut bad_tick = limit("0xa", Side::Buy, 100, 1);
        bad_tick.kind = OrderKind::Limit { price: Price::from_str("100.5").unwrap() };
        assert_eq!(engine.submit(bad_tick, Utc::now()).unwrap_err().reason_code(), "INVALID_TICK");

        let mut bad_lot = limit("0xa", Side::Buy, 100, 1);
        bad_lot.size = Quantity::from_str("1.5").unwrap();
        assert_eq!(engine.submit(bad_lot, Utc::now()).unwrap_err().reason_code(), "INVALID_LOT");

        let mut wrong_market = limit("0xa", Side::Buy, 100, 1);
        wrong_market.market_id = MarketId::new(9);
        assert_eq!(engine.submit(wrong_market, Utc::now()).unwrap_err().reason_code(), "MARKET_UNKNOWN");

        let mut expired = limit("0xa", Side::Buy, 100, 1);
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert_eq!(engine.submit(expired, Utc::now()).unwrap_err().reason_code(), "INVALID_PARAMETERS");

        assert_eq!(engine.book().order_count(), 0);
        assert_eq!(engine.next_sequence(), 1);
    }

    #[test]
    fn test_cancel_resting_and_unknown() {
        let mut engine = engine();
        let resting = engine.submit(limit("0xa", Side::Buy, 100, 1), Utc::now()).unwrap().order;

        let outcome = engine.cancel(&resting.id, Utc::now()).unwrap();
        assert_eq!(outcome.orders[0].status, OrderStatus::Cancelled);
        assert!(engine.book().best_bid().is_none());
        assert!(matches!(
            outcome.events[0],
            EngineEvent::BookDelta(LevelDelta { order_count: 0, .. })
        ));

        let err = engine.cancel(&resting.id, Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "ORDER_NOT_FOUND");
    }

    #[test]
    fn test_expire_due() {
        let mut engine = engine();
        let now = Utc::now();
        let mut short = limit("0xa", Side::Buy, 100, 1);
        short.expires_at = Some(now + chrono::Duration::seconds(5));
        let short = engine.submit(short, now).unwrap().order;
        engine.submit(limit("0xa", Side::Buy, 99, 1), now).unwrap();

        assert!(engine.expire_due(now).orders.is_empty());
        let outcome = engine.expire_due(now + chrono::Duration::seconds(5));
        assert_eq!(outcome.orders.len(), 1);
        assert_eq!(outcome.orders[0].id, short.id);
        assert_eq!(outcome.orders[0].status, OrderStatus::Expired);
        assert_eq!(engine.book().best_bid().unwrap().price, Price::from_u64(99));
    }

    #[test]
    fn test_events_order() {
        let mut engine = engine();
        engine.submit(limit("0xa", Side::Sell, 100, 1), Utc::now()).unwrap();
        let outcome = engine.submit(limit("0xb", Side::Buy, 100, 1), Utc::now()).unwrap();

        assert!(matches!(outcome.events[0], EngineEvent::Trade(_)));
        assert!(matches!(outcome.events[1], EngineEvent::BookDelta(_)));
        assert!(matches!(outcome.events.last(), Some(EngineEvent::OrderUpdate(o)) if o.id == outcome.order.id));
        assert_eq!(outcome.changed_orders().count(), 2);
    }

    #[test]
    fn test_restore_resumes_sequences() {
        let mut engine = engine();
        let mut order = limit("0xa", Side::Buy, 100, 1);
        order.sequence = 41;
        engine.restore_resting(order).unwrap();
        assert_eq!(engine.next_sequence(), 42);

        let next = engine.submit(limit("0xb", Side::Buy, 100, 1), Utc::now()).unwrap().order;
        assert_eq!(next.sequence, 42);
    }

    #[test]
    fn test_halted_market_refuses_orders() {
        let mut engine = engine();
        engine.halt(EngineError::InvariantViolation {
            market_id: 1,
            detail: "test".to_string(),
        });
        let err = engine.submit(limit("0xa", Side::Buy, 100, 1), Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "MARKET_HALTED");

        engine.clear_halt().unwrap();
        assert!(engine.submit(limit("0xa", Side::Buy, 100, 1), Utc::now()).is_ok());
    }
}
