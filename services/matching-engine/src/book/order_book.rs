//! Per-market order book
//!
//! Owns the resting order records and both sides of the book. The order map
//! doubles as the cancel index: order id -> (side, price, sequence) is read
//! straight off the record, so a cancel is a map lookup plus a BTreeMap
//! removal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::errors::{EngineError, OrderError};
use types::ids::{MarketId, OrderId, UserAddress};
use types::market::MarketConfig;
use types::numeric::{Price, Quantity};
use types::order::{Order, Side};

use super::{AskBook, BidBook, BookLevel};

/// Point-in-time aggregated view of both sides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub market_id: MarketId,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub last_updated: DateTime<Utc>,
}

/// Resting limit orders of one market
#[derive(Debug, Clone)]
pub struct OrderBook {
    market_id: MarketId,
    tick_size: Decimal,
    lot_size: Decimal,
    bids: BidBook,
    asks: AskBook,
    /// Resting orders only; terminal orders never stay here
    orders: HashMap<OrderId, Order>,
    last_updated: DateTime<Utc>,
}

impl OrderBook {
    pub fn new(config: &MarketConfig) -> Self {
        Self {
            market_id: config.market_id,
            tick_size: config.tick_size,
            lot_size: config.lot_size,
            bids: BidBook::new(),
            asks: AskBook::new(),
            orders: HashMap::new(),
            last_updated: DateTime::<Utc>::default(),
        }
    }

    pub fn market_id(&self) -> MarketId {
        self.market_id
    }

    /// Add a resting limit order at the back of its price level
    pub fn insert(&mut self, order: Order) -> Result<(), OrderError> {
        let price = order.limit_price().ok_or_else(|| {
            OrderError::InvalidParameters("market orders never rest".to_string())
        })?;
        if !price.is_aligned(self.tick_size) {
            return Err(OrderError::InvalidTick {
                price: price.to_string(),
                tick_size: self.tick_size.to_string(),
            });
        }
        if !order.size.is_aligned(self.lot_size) || !order.remaining().is_aligned(self.lot_size) {
            return Err(OrderError::InvalidLot {
                size: order.size.to_string(),
                lot_size: self.lot_size.to_string(),
            });
        }
        if order.is_terminal() || order.remaining().is_zero() {
            return Err(OrderError::InvalidParameters(format!(
                "order {} has nothing left to rest",
                order.id
            )));
        }
        if self.orders.contains_key(&order.id) {
            return Err(OrderError::InvalidParameters(format!(
                "order {} is already resting",
                order.id
            )));
        }

        match order.side {
            Side::Buy => self.bids.insert(price, order.sequence, order.id, order.remaining()),
            Side::Sell => self.asks.insert(price, order.sequence, order.id, order.remaining()),
        }
        self.last_updated = order.updated_at;
        self.orders.insert(order.id, order);
        Ok(())
    }

    /// Remove a resting order, returning its record unchanged
    pub fn remove(&mut self, order_id: &OrderId) -> Result<Order, OrderError> {
        let order = self.orders.remove(order_id).ok_or_else(|| OrderError::NotFound {
            order_id: order_id.to_string(),
        })?;
        if let Some(price) = order.limit_price() {
            match order.side {
                Side::Buy => self.bids.remove(price, order.sequence),
                Side::Sell => self.asks.remove(price, order.sequence),
            };
        }
        Ok(order)
    }

    /// Apply a fill to the resting order; it keeps its queue position and
    /// leaves the book once fully filled. Returns the updated record.
    pub fn fill_resting(
        &mut self,
        order_id: &OrderId,
        fill: Quantity,
        now: DateTime<Utc>,
    ) -> Result<Order, EngineError> {
        let market_id = self.market_id.as_u64();
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| EngineError::InvariantViolation {
                market_id,
                detail: format!("maker {} missing from order index", order_id),
            })?;
        let price = order.limit_price().ok_or_else(|| EngineError::InvariantViolation {
            market_id,
            detail: format!("maker {} has no limit price", order_id),
        })?;
        order.add_fill(fill, now)?;

        let level_remaining = match order.side {
            Side::Buy => self.bids.reduce(price, order.sequence, fill),
            Side::Sell => self.asks.reduce(price, order.sequence, fill),
        };
        if level_remaining != Some(order.remaining()) {
            return Err(EngineError::InvariantViolation {
                market_id,
                detail: format!(
                    "level entry for {} out of sync: level {:?}, order {}",
                    order_id,
                    level_remaining,
                    order.remaining()
                ),
            });
        }

        let updated = order.clone();
        if updated.is_filled() {
            self.orders.remove(order_id);
        }
        self.last_updated = now;
        Ok(updated)
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.orders.contains_key(order_id)
    }

    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.best_bid()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.best_ask()
    }

    /// Up to `depth` aggregated levels of one side, best first
    pub fn levels(&self, side: Side, depth: usize) -> Vec<BookLevel> {
        match side {
            Side::Buy => self.bids.depth_snapshot(depth),
            Side::Sell => self.asks.depth_snapshot(depth),
        }
    }

    /// Current aggregate at one price; None once the level is gone
    pub fn level_at(&self, side: Side, price: Price) -> Option<BookLevel> {
        match side {
            Side::Buy => self.bids.level_at(price),
            Side::Sell => self.asks.level_at(price),
        }
    }

    /// Highest-priority resting order a taker on `taker_side` would hit
    pub fn best_opposite(&self, taker_side: Side) -> Option<(Price, u64, OrderId, Quantity)> {
        match taker_side {
            Side::Buy => self.asks.front(),
            Side::Sell => self.bids.front(),
        }
    }

    /// Opposite-side liquidity reachable at `limit`, capped once `target` is met
    pub fn available_liquidity(
        &self,
        taker_side: Side,
        limit: Option<Price>,
        target: Quantity,
    ) -> Quantity {
        match taker_side {
            Side::Buy => self.asks.available_to_buy(limit, target),
            Side::Sell => self.bids.available_to_sell(limit, target),
        }
    }

    /// True when a limit order at `price` would take liquidity immediately
    pub fn would_cross(&self, taker_side: Side, price: Price) -> bool {
        match taker_side {
            Side::Buy => self.asks.best_ask_price().is_some_and(|ask| price >= ask),
            Side::Sell => self.bids.best_bid_price().is_some_and(|bid| price <= bid),
        }
    }

    /// A crossed book must never persist between operations
    pub fn is_crossed(&self) -> bool {
        match (self.bids.best_bid_price(), self.asks.best_ask_price()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Resting orders whose expiry is at or before `now`, in admission order
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        let mut due: Vec<&Order> = self
            .orders
            .values()
            .filter(|o| o.is_expired_at(now))
            .collect();
        due.sort_by_key(|o| o.sequence);
        due.into_iter().map(|o| o.id).collect()
    }

    pub fn resting_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Open size of `user`'s resting reduce-only orders on `side`
    pub fn resting_reduce_only(&self, user: &UserAddress, side: Side) -> Decimal {
        self.orders
            .values()
            .filter(|o| o.flags.reduce_only && o.side == side && &o.user_address == user)
            .map(|o| o.remaining().as_decimal())
            .sum()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }

    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            market_id: self.market_id,
            bids: self.bids.depth_snapshot(depth),
            asks: self.asks.depth_snapshot(depth),
            last_updated: self.last_updated,
        }
    }

    /// Full structural check: no cross, cached level totals match their
    /// entries, and every level entry agrees with its order record.
    pub fn check_integrity(&self) -> Result<(), String> {
        if self.is_crossed() {
            return Err(format!(
                "book crossed: bid {:?} >= ask {:?}",
                self.bids.best_bid_price(),
                self.asks.best_ask_price()
            ));
        }

        let mut entries = 0usize;
        let sides = self
            .bids
            .levels()
            .map(|(p, l)| (Side::Buy, p, l))
            .chain(self.asks.levels().map(|(p, l)| (Side::Sell, p, l)));
        for (side, price, level) in sides {
            if level.is_empty() {
                return Err(format!("empty {} level left at {}", side, price));
            }
            if level.total_quantity() != level.recomputed_quantity() {
                return Err(format!("{} level {} total out of sync", side, price));
            }
            for (seq, order_id, remaining) in level.entries() {
                entries += 1;
                let order = self
                    .orders
                    .get(&order_id)
                    .ok_or_else(|| format!("level entry {} has no order record", order_id))?;
                if order.side != side
                    || order.limit_price() != Some(*price)
                    || order.sequence != seq
                    || order.remaining() != remaining
                    || !order.check_invariant()
                    || order.is_terminal()
                {
                    return Err(format!("order {} disagrees with its level entry", order_id));
                }
            }
        }
        if entries != self.orders.len() {
            return Err(format!(
                "{} level entries for {} resting orders",
                entries,
                self.orders.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::UserAddress;
    use types::order::{OrderFlags, OrderIntent, OrderKind, TimeInForce};

    fn config() -> MarketConfig {
        let mut config = MarketConfig::btc_usdc();
        config.tick_size = Decimal::new(5, 1);
        config.lot_size = Decimal::new(1, 1);
        config
    }

    fn resting(side: Side, price: &str, size: &str, seq: u64) -> Order {
        let intent = OrderIntent {
            user_address: UserAddress::try_new("0xabc").unwrap(),
            market_id: MarketId::new(1),
            side,
            kind: OrderKind::Limit {
                price: Price::from_str(price).unwrap(),
            },
            size: Quantity::from_str(size).unwrap(),
            time_in_force: TimeInForce::GTC,
            flags: OrderFlags::default(),
            expires_at: None,
        };
        let mut order = Order::from_intent(OrderId::new(), intent, Utc::now());
        order.sequence = seq;
        order
    }

    #[test]
    fn test_insert_rejects_off_tick() {
        let mut book = OrderBook::new(&config());
        let err = book.insert(resting(Side::Buy, "100.2", "1", 1)).unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_TICK");
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn test_insert_rejects_off_lot() {
        let mut book = OrderBook::new(&config());
        let err = book.insert(resting(Side::Sell, "100.5", "1.05", 1)).unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_LOT");
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let mut book = OrderBook::new(&config());
        let err = book.remove(&OrderId::new()).unwrap_err();
        assert_eq!(err.reason_code(), "ORDER_NOT_FOUND");
    }

    #[test]
    fn test_insert_and_remove_updates_levels() {
        let mut book = OrderBook::new(&config());
        let a = resting(Side::Buy, "100", "1", 1);
        let b = resting(Side::Buy, "100", "2", 2);
        let a_id = a.id;
        book.insert(a).unwrap();
        book.insert(b).unwrap();

        let best = book.best_bid().unwrap();
        assert_eq!(best.size, Quantity::from_u64(3));
        assert_eq!(best.order_count, 2);

        book.remove(&a_id).unwrap();
        let best = book.best_bid().unwrap();
        assert_eq!(best.size, Quantity::from_u64(2));
        assert_eq!(best.order_count, 1);
        assert!(book.check_integrity().is_ok());
    }

    #[test]
    fn test_fill_resting_keeps_position_then_removes() {
        let mut book = OrderBook::new(&config());
        let first = resting(Side::Sell, "101", "2", 1);
        let second = resting(Side::Sell, "101", "1", 2);
        let first_id = first.id;
        book.insert(first).unwrap();
        book.insert(second).unwrap();

        let updated = book
            .fill_resting(&first_id, Quantity::from_u64(1), Utc::now())
            .unwrap();
        assert_eq!(updated.remaining(), Quantity::from_u64(1));
        assert_eq!(book.best_opposite(Side::Buy).unwrap().2, first_id);

        let updated = book
            .fill_resting(&first_id, Quantity::from_u64(1), Utc::now())
            .unwrap();
        assert!(updated.is_filled());
        assert!(!book.contains(&first_id));
        assert_eq!(book.best_ask().unwrap().order_count, 1);
        assert!(book.check_integrity().is_ok());
    }

    #[test]
    fn test_would_cross_and_levels() {
        let mut book = OrderBook::new(&config());
        book.insert(resting(Side::Buy, "99", "1", 1)).unwrap();
        book.insert(resting(Side::Sell, "101", "1", 2)).unwrap();
        book.insert(resting(Side::Sell, "102", "1", 3)).unwrap();

        assert!(book.would_cross(Side::Buy, Price::from_u64(101)));
        assert!(!book.would_cross(Side::Buy, Price::from_str("100.5").unwrap()));
        assert!(book.would_cross(Side::Sell, Price::from_u64(99)));
        assert!(!book.is_crossed());

        let asks = book.levels(Side::Sell, 10);
        assert_eq!(asks.len(), 2);
        assert_eq!(asks[0].price, Price::from_u64(101));
    }

    #[test]
    fn test_expired_in_admission_order() {
        let mut book = OrderBook::new(&config());
        let now = Utc::now();
        let mut late = resting(Side::Buy, "99", "1", 5);
        late.expires_at = Some(now);
        let mut early = resting(Side::Buy, "98", "1", 2);
        early.expires_at = Some(now - chrono::Duration::seconds(5));
        let live = resting(Side::Buy, "97", "1", 1);
        let (late_id, early_id) = (late.id, early.id);
        book.insert(late).unwrap();
        book.insert(early).unwrap();
        book.insert(live).unwrap();

        assert_eq!(book.expired(now), vec![early_id, late_id]);
    }
}
