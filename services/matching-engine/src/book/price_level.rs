//! Price level implementation with FIFO queue
//!
//! A price level contains all resting orders at a specific price point.
//! Orders are keyed by their admission sequence, so iteration order is
//! arrival order and a cancel in the middle of the queue is O(log n).

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::{Price, Quantity};

use super::BookLevel;

/// A price level containing orders at a specific price
///
/// Maintains strict FIFO ordering for time-priority matching.
/// Orders are stored as OrderId references with their remaining quantities.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    /// Admission sequence -> entry (ascending = FIFO)
    orders: BTreeMap<u64, LevelEntry>,
    /// Total quantity available at this level
    total_quantity: Quantity,
}

/// Entry in the price level queue
#[derive(Debug, Clone, Copy)]
struct LevelEntry {
    order_id: OrderId,
    remaining_quantity: Quantity,
}

impl PriceLevel {
    /// Create a new empty price level
    pub fn new() -> Self {
        Self {
            orders: BTreeMap::new(),
            total_quantity: Quantity::zero(),
        }
    }

    /// Insert an order; its sequence decides its queue position
    pub fn insert(&mut self, sequence: u64, order_id: OrderId, quantity: Quantity) {
        self.orders.insert(
            sequence,
            LevelEntry {
                order_id,
                remaining_quantity: quantity,
            },
        );
        self.total_quantity += quantity;
    }

    /// Remove an order from the queue by sequence
    ///
    /// Returns the order id and remaining quantity, or None if not found
    pub fn remove(&mut self, sequence: u64) -> Option<(OrderId, Quantity)> {
        let entry = self.orders.remove(&sequence)?;
        self.total_quantity = self.total_quantity - entry.remaining_quantity;
        Some((entry.order_id, entry.remaining_quantity))
    }

    /// Peek at the front order without removing it
    ///
    /// Returns (sequence, order_id, quantity)
    pub fn peek_front(&self) -> Option<(u64, OrderId, Quantity)> {
        self.orders
            .iter()
            .next()
            .map(|(seq, entry)| (*seq, entry.order_id, entry.remaining_quantity))
    }

    /// Reduce an order's remaining quantity by a fill
    ///
    /// The order keeps its queue position. If the remainder becomes zero the
    /// entry is removed. Returns the new remainder, or None if not found.
    pub fn reduce(&mut self, sequence: u64, fill: Quantity) -> Option<Quantity> {
        let entry = self.orders.get_mut(&sequence)?;
        let consumed = if fill > entry.remaining_quantity {
            entry.remaining_quantity
        } else {
            fill
        };
        entry.remaining_quantity = entry.remaining_quantity - consumed;
        let remaining = entry.remaining_quantity;
        if remaining.is_zero() {
            self.orders.remove(&sequence);
        }
        self.total_quantity = self.total_quantity - consumed;
        Some(remaining)
    }

    /// Check if the price level is empty
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Get the total quantity at this price level
    pub fn total_quantity(&self) -> Quantity {
        self.total_quantity
    }

    /// Get the number of orders at this level
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Sum of entry quantities, recomputed without the cache
    pub fn recomputed_quantity(&self) -> Quantity {
        self.orders
            .values()
            .fold(Quantity::zero(), |acc, e| acc + e.remaining_quantity)
    }

    /// Order ids in queue order
    pub fn order_ids(&self) -> impl Iterator<Item = OrderId> + '_ {
        self.orders.values().map(|e| e.order_id)
    }

    /// (sequence, order_id, remaining) in queue order
    pub fn entries(&self) -> impl Iterator<Item = (u64, OrderId, Quantity)> + '_ {
        self.orders
            .iter()
            .map(|(seq, e)| (*seq, e.order_id, e.remaining_quantity))
    }

    /// Aggregated view of this level
    pub fn view(&self, price: Price) -> BookLevel {
        BookLevel {
            price,
            size: self.total_quantity,
            order_count: self.orders.len() as u64,
        }
    }
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::new()
    }
}
