//! Order table and per-user fill history behind the query endpoints

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use types::ids::{OrderId, UserAddress};
use types::order::{Order, OrderStatus};
use types::trade::Trade;

pub const DEFAULT_PAGE: usize = 100;
pub const MAX_PAGE: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeQuery {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

fn page_size(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE)
}

#[derive(Debug, Default)]
pub struct History {
    orders: DashMap<OrderId, Order>,
    user_orders: DashMap<UserAddress, Vec<OrderId>>,
    user_trades: DashMap<UserAddress, Vec<Trade>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, order: &Order) {
        if self.orders.insert(order.id, order.clone()).is_none() {
            self.user_orders
                .entry(order.user_address.clone())
                .or_default()
                .push(order.id);
        }
    }

    pub fn record_trade(&self, trade: &Trade) {
        self.user_trades
            .entry(trade.taker_address.clone())
            .or_default()
            .push(trade.clone());
        // Self-trades are listed once
        if trade.maker_address != trade.taker_address {
            self.user_trades
                .entry(trade.maker_address.clone())
                .or_default()
                .push(trade.clone());
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<Order> {
        self.orders.get(order_id).map(|o| o.clone())
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// A user's orders, newest first; `total` counts every match before paging
    pub fn orders_for(&self, user: &UserAddress, query: &OrderQuery) -> (Vec<Order>, usize) {
        let Some(ids) = self.user_orders.get(user).map(|ids| ids.clone()) else {
            return (Vec::new(), 0);
        };
        let mut matching: Vec<Order> = ids
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|o| query.status.is_none_or(|s| o.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.sequence.cmp(&a.sequence)));
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(query.offset)
            .take(page_size(query.limit))
            .collect();
        (page, total)
    }

    /// A user's fills as taker or maker, newest first
    pub fn trades_for(&self, user: &UserAddress, query: &TradeQuery) -> (Vec<Trade>, usize) {
        let Some(trades) = self.user_trades.get(user) else {
            return (Vec::new(), 0);
        };
        let matching: Vec<&Trade> = trades
            .iter()
            .rev()
            .filter(|t| query.start_time.is_none_or(|start| t.created_at >= start))
            .filter(|t| query.end_time.is_none_or(|end| t.created_at <= end))
            .collect();
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(query.offset)
            .take(page_size(query.limit))
            .cloned()
            .collect();
        (page, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use types::ids::{MarketId, TradeId};
    use types::numeric::{Price, Quantity};
    use types::order::{OrderFlags, OrderIntent, OrderKind, Side, TimeInForce};

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn order(user: &str, at: DateTime<Utc>) -> Order {
        let intent = OrderIntent {
            user_address: UserAddress::try_new(user).unwrap(),
            market_id: MarketId::new(1),
            side: Side::Buy,
            kind: OrderKind::Limit { price: Price::from_u64(100) },
            size: Quantity::from_u64(2),
            time_in_force: TimeInForce::GTC,
            flags: OrderFlags::default(),
            expires_at: None,
        };
        Order::from_intent(OrderId::new(), intent, at)
    }

    fn trade(taker: &str, maker: &str, at: DateTime<Utc>) -> Trade {
        Trade {
            id: TradeId::new(),
            sequence: 1,
            market_id: MarketId::new(1),
            taker_order_id: OrderId::new(),
            maker_order_id: OrderId::new(),
            taker_address: UserAddress::try_new(taker).unwrap(),
            maker_address: UserAddress::try_new(maker).unwrap(),
            size: Quantity::from_u64(1),
            price: Price::from_u64(100),
            side: Side::Buy,
            fee_bps: 5,
            maker_fee_bps: 2,
            created_at: at,
        }
    }

    #[test]
    fn test_orders_filter_and_page() {
        let history = History::new();
        let user = UserAddress::try_new("0xa").unwrap();
        for i in 0..5 {
            let mut o = order("0xa", t0() + Duration::seconds(i));
            if i % 2 == 0 {
                o.cancel(t0()).unwrap();
            }
            history.upsert(&o);
        }
        history.upsert(&order("0xb", t0()));

        let (all, total) = history.orders_for(&user, &OrderQuery::default());
        assert_eq!(total, 5);
        assert!(all[0].created_at > all[1].created_at);

        let query = OrderQuery {
            status: Some(OrderStatus::Cancelled),
            limit: Some(2),
            offset: 1,
        };
        let (page, total) = history.orders_for(&user, &query);
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|o| o.status == OrderStatus::Cancelled));
    }

    #[test]
    fn test_upsert_replaces_without_duplicating() {
        let history = History::new();
        let mut o = order("0xa", t0());
        history.upsert(&o);
        o.cancel(t0()).unwrap();
        history.upsert(&o);

        let (orders, total) = history.orders_for(&o.user_address, &OrderQuery::default());
        assert_eq!(total, 1);
        assert_eq!(orders[0].status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_trades_by_time_window_and_party() {
        let history = History::new();
        history.record_trade(&trade("0xa", "0xb", t0()));
        history.record_trade(&trade("0xb", "0xa", t0() + Duration::hours(1)));
        history.record_trade(&trade("0xa", "0xa", t0() + Duration::hours(2)));

        let a = UserAddress::try_new("0xa").unwrap();
        let (trades, total) = history.trades_for(&a, &TradeQuery::default());
        assert_eq!(total, 3);
        assert_eq!(trades[0].created_at, t0() + Duration::hours(2));

        let query = TradeQuery {
            start_time: Some(t0() + Duration::minutes(30)),
            end_time: Some(t0() + Duration::minutes(90)),
            ..TradeQuery::default()
        };
        let (trades, total) = history.trades_for(&a, &query);
        assert_eq!(total, 1);
        assert_eq!(trades[0].maker_address, a);
    }
}
