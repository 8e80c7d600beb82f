//! Ask (sell-side) order book
//!
//! Maintains sell orders sorted by price ascending (best ask first).
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::{Price, Quantity};

use super::price_level::PriceLevel;
use super::BookLevel;

/// Ask (sell) side order book
///
/// Orders are sorted by price ascending, so the lowest ask is first.
/// At each price level, orders are maintained in FIFO order.
#[derive(Debug, Clone)]
pub struct AskBook {
    /// Price levels sorted ascending (lowest price first)
    levels: BTreeMap<Price, PriceLevel>,
}

impl AskBook {
    /// Create a new empty ask book
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Insert a resting order into the ask book
    pub fn insert(&mut self, price: Price, sequence: u64, order_id: OrderId, quantity: Quantity) {
        let level = self.levels.entry(price).or_default();
        level.insert(sequence, order_id, quantity);
    }

    /// Remove an order from the ask book
    ///
    /// Returns the remaining quantity if the order was found
    pub fn remove(&mut self, price: Price, sequence: u64) -> Option<Quantity> {
        let level = self.levels.get_mut(&price)?;
        let (_, remaining) = level.remove(sequence)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(remaining)
    }

    /// Apply a fill to a resting order, dropping the level once empty
    pub fn reduce(&mut self, price: Price, sequence: u64, fill: Quantity) -> Option<Quantity> {
        let level = self.levels.get_mut(&price)?;
        let remaining = level.reduce(sequence, fill)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(remaining)
    }

    /// Get the best ask (lowest price)
    pub fn best_ask(&self) -> Option<BookLevel> {
        self.levels
            .iter()
            .next()
            .map(|(price, level)| level.view(*price))
    }

    /// Get the best ask price
    pub fn best_ask_price(&self) -> Option<Price> {
        self.levels.keys().next().copied()
    }

    /// Highest-priority resting order: (price, sequence, order_id, remaining)
    pub fn front(&self) -> Option<(Price, u64, OrderId, Quantity)> {
        let (price, level) = self.levels.iter().next()?;
        let (seq, order_id, qty) = level.peek_front()?;
        Some((*price, seq, order_id, qty))
    }

    /// Aggregated level at a price, if any orders rest there
    pub fn level_at(&self, price: Price) -> Option<BookLevel> {
        self.levels.get(&price).map(|level| level.view(price))
    }

    /// Ask liquidity a buy priced at `limit` (None = market) could take,
    /// stopping once `target` is reached
    pub fn available_to_buy(&self, limit: Option<Price>, target: Quantity) -> Quantity {
        let mut available = Quantity::zero();
        for (price, level) in self.levels.iter() {
            if limit.is_some_and(|limit| *price > limit) || available >= target {
                break;
            }
            available += level.total_quantity();
        }
        available
    }

    /// Get depth snapshot (top N price levels)
    pub fn depth_snapshot(&self, depth: usize) -> Vec<BookLevel> {
        self.levels
            .iter()
            .take(depth)
            .map(|(price, level)| level.view(*price))
            .collect()
    }

    /// Iterate levels best-first
    pub fn levels(&self) -> impl Iterator<Item = (&Price, &PriceLevel)> {
        self.levels.iter()
    }

    /// Check if the ask book is empty
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Get the total number of price levels
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}

impl Default for AskBook {
    fn default() -> Self {
        Self::new()
    }
}
