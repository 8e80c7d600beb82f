//! Public trade tape and rolling 24h market summary
//!
//! One tape per market. The tape keeps a bounded history for the recent
//! trades endpoint and a time-bounded window for the 24h statistics.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::{MarketId, TradeId};
use types::numeric::{Price, Quantity};
use types::order::Side;
use types::trade::Trade;

/// Trade as shown publicly (no addresses)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicTrade {
    pub trade_id: TradeId,
    /// Per-market fill sequence
    pub sequence: u64,
    pub market_id: MarketId,
    pub price: Price,
    pub size: Quantity,
    /// price × size
    pub value: Decimal,
    pub taker_side: Side,
    pub created_at: DateTime<Utc>,
}

impl From<&Trade> for PublicTrade {
    fn from(trade: &Trade) -> Self {
        Self {
            trade_id: trade.id,
            sequence: trade.sequence,
            market_id: trade.market_id,
            price: trade.price,
            size: trade.size,
            value: trade.notional(),
            taker_side: trade.side,
            created_at: trade.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market_id: MarketId,
    pub symbol: String,
    pub last_price: Option<Decimal>,
    /// Base-asset volume over the last 24h
    pub volume_24h: Decimal,
    /// Last price minus the first price inside the window
    pub price_change_24h: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
}

#[derive(Debug)]
pub struct TradeTape {
    market_id: MarketId,
    history: VecDeque<PublicTrade>,
    max_history: usize,
    window: VecDeque<PublicTrade>,
    last_price: Option<Price>,
}

impl TradeTape {
    pub fn new(market_id: MarketId, max_history: usize) -> Self {
        Self {
            market_id,
            history: VecDeque::with_capacity(max_history.min(1024)),
            max_history: max_history.max(1),
            window: VecDeque::new(),
            last_price: None,
        }
    }

    pub fn market_id(&self) -> MarketId {
        self.market_id
    }

    /// Append a fill; fills of other markets are ignored
    pub fn record(&mut self, trade: &Trade) -> Option<PublicTrade> {
        if trade.market_id != self.market_id {
            return None;
        }
        let public = PublicTrade::from(trade);

        if self.history.len() >= self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(public.clone());

        self.window.push_back(public.clone());
        self.prune(trade.created_at);
        self.last_price = Some(trade.price);
        Some(public)
    }

    /// Most recent trades, newest first
    pub fn recent(&self, limit: usize) -> Vec<PublicTrade> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn last_price(&self) -> Option<Price> {
        self.last_price
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Statistics over trades within 24h before `now`
    pub fn summary(&self, symbol: &str, now: DateTime<Utc>) -> MarketSummary {
        let cutoff = now - Duration::hours(24);
        let in_window: Vec<&PublicTrade> = self.window.iter().filter(|t| t.created_at > cutoff).collect();

        let volume_24h = in_window.iter().map(|t| t.size.as_decimal()).sum();
        let high_24h = in_window.iter().map(|t| t.price.as_decimal()).max();
        let low_24h = in_window.iter().map(|t| t.price.as_decimal()).min();
        let price_change_24h = match (in_window.first(), in_window.last()) {
            (Some(first), Some(last)) => Some(last.price.as_decimal() - first.price.as_decimal()),
            _ => None,
        };

        MarketSummary {
            market_id: self.market_id,
            symbol: symbol.to_string(),
            last_price: self.last_price.map(|p| p.as_decimal()),
            volume_24h,
            price_change_24h,
            high_24h,
            low_24h,
        }
    }

    fn prune(&mut self, latest: DateTime<Utc>) {
        let cutoff = latest - Duration::hours(24);
        while self.window.front().is_some_and(|t| t.created_at <= cutoff) {
            self.window.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use types::ids::{OrderId, UserAddress};

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn trade(sequence: u64, price: u64, size: &str, at: DateTime<Utc>) -> Trade {
        Trade {
            id: TradeId::new(),
            sequence,
            market_id: MarketId::new(1),
            taker_order_id: OrderId::new(),
            maker_order_id: OrderId::new(),
            taker_address: UserAddress::try_new("0xt").unwrap(),
            maker_address: UserAddress::try_new("0xm").unwrap(),
            size: Quantity::from_str(size).unwrap(),
            price: Price::from_u64(price),
            side: Side::Buy,
            fee_bps: 5,
            maker_fee_bps: 2,
            created_at: at,
        }
    }

    #[test]
    fn test_recent_is_newest_first_and_bounded() {
        let mut tape = TradeTape::new(MarketId::new(1), 3);
        for i in 1..=5 {
            tape.record(&trade(i, 100, "1", t0()));
        }
        let recent = tape.recent(10);
        let sequences: Vec<u64> = recent.iter().map(|t| t.sequence).collect();
        assert_eq!(sequences, vec![5, 4, 3]);
        assert_eq!(tape.recent(1)[0].sequence, 5);
    }

    #[test]
    fn test_other_market_ignored() {
        let mut tape = TradeTape::new(MarketId::new(2), 10);
        assert!(tape.record(&trade(1, 100, "1", t0())).is_none());
        assert!(tape.is_empty());
    }

    #[test]
    fn test_summary_over_window() {
        let mut tape = TradeTape::new(MarketId::new(1), 100);
        tape.record(&trade(1, 90, "5", t0()));
        tape.record(&trade(2, 100, "1", t0() + Duration::hours(2)));
        tape.record(&trade(3, 120, "2", t0() + Duration::hours(3)));
        tape.record(&trade(4, 110, "0.5", t0() + Duration::hours(4)));

        // First trade has aged out of the window by now
        let now = t0() + Duration::hours(25);
        let summary = tape.summary("BTC/USDC", now);
        assert_eq!(summary.last_price, Some(Decimal::from(110)));
        assert_eq!(summary.volume_24h, Decimal::new(35, 1));
        assert_eq!(summary.high_24h, Some(Decimal::from(120)));
        assert_eq!(summary.low_24h, Some(Decimal::from(100)));
        assert_eq!(summary.price_change_24h, Some(Decimal::from(10)));
    }

    #[test]
    fn test_empty_summary() {
        let tape = TradeTape::new(MarketId::new(1), 10);
        let summary = tape.summary("BTC/USDC", t0());
        assert_eq!(summary.last_price, None);
        assert_eq!(summary.volume_24h, Decimal::ZERO);
        assert_eq!(summary.price_change_24h, None);
    }

    #[test]
    fn test_summary_serializes_decimals_as_strings() {
        let mut tape = TradeTape::new(MarketId::new(1), 10);
        tape.record(&trade(1, 100, "1.5", t0()));
        let json = serde_json::to_value(tape.summary("BTC/USDC", t0())).unwrap();
        assert_eq!(json["last_price"], "100");
        assert_eq!(json["volume_24h"], "1.5");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_tape_keeps_newest_within_bound(cap in 1usize..20, fills in 0u64..60) {
                let mut tape = TradeTape::new(MarketId::new(1), cap);
                for i in 1..=fills {
                    tape.record(&trade(i, 100 + i, "1", t0()));
                }
                prop_assert_eq!(tape.len(), (fills as usize).min(cap));

                let sequences: Vec<u64> = tape.recent(usize::MAX).iter().map(|t| t.sequence).collect();
                prop_assert!(sequences.windows(2).all(|w| w[0] > w[1]));
                if fills > 0 {
                    prop_assert_eq!(sequences[0], fills);
                    prop_assert_eq!(tape.last_price(), Some(Price::from_u64(100 + fills)));
                }
            }
        }
    }
}
