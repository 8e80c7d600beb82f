//! Per-market trading parameters
//!
//! Tick and lot sizes gate every order at the parse boundary. `imr_bps` and
//! `mmr_bps` are supplied by configuration and only consumed by the freeze
//! quote; the engine never derives them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::OrderError;
use crate::fee::{default_fee_tiers, FeeTier};
use crate::ids::MarketId;
use crate::numeric::{Price, Quantity};

fn default_active() -> bool {
    true
}

/// Static market configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub market_id: MarketId,
    /// e.g. "BTC/USDC"
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    /// Smallest accepted order size
    pub min_size: Decimal,
    pub max_leverage: u32,
    /// Initial margin requirement in basis points
    pub imr_bps: u32,
    /// Maintenance margin requirement in basis points
    pub mmr_bps: u32,
    #[serde(default = "default_fee_tiers")]
    pub fee_tiers: Vec<FeeTier>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl MarketConfig {
    /// Reject prices that are off the tick grid
    pub fn validate_price(&self, price: Price) -> Result<(), OrderError> {
        if !price.is_aligned(self.tick_size) {
            return Err(OrderError::InvalidTick {
                price: price.to_string(),
                tick_size: self.tick_size.to_string(),
            });
        }
        Ok(())
    }

    /// Reject zero, undersized or off-lot sizes
    pub fn validate_size(&self, size: Quantity) -> Result<(), OrderError> {
        if size.is_zero() {
            return Err(OrderError::InvalidParameters(
                "size must be greater than zero".to_string(),
            ));
        }
        if size.as_decimal() < self.min_size {
            return Err(OrderError::InvalidParameters(format!(
                "size {} is below minimum {}",
                size, self.min_size
            )));
        }
        if !size.is_aligned(self.lot_size) {
            return Err(OrderError::InvalidLot {
                size: size.to_string(),
                lot_size: self.lot_size.to_string(),
            });
        }
        Ok(())
    }

    /// Sanity-check configured parameters before the market is registered
    pub fn check(&self) -> Result<(), String> {
        if self.tick_size <= Decimal::ZERO {
            return Err(format!("market {}: tick_size must be positive", self.market_id));
        }
        if self.lot_size <= Decimal::ZERO {
            return Err(format!("market {}: lot_size must be positive", self.market_id));
        }
        if self.imr_bps == 0 || self.imr_bps > 10_000 {
            return Err(format!("market {}: imr_bps must be in 1..=10000", self.market_id));
        }
        if self.mmr_bps > self.imr_bps {
            return Err(format!("market {}: mmr_bps exceeds imr_bps", self.market_id));
        }
        let mut thresholds = self.fee_tiers.iter().map(|t| t.volume_threshold);
        if let Some(mut prev) = thresholds.next() {
            for next in thresholds {
                if next <= prev {
                    return Err(format!(
                        "market {}: fee tiers must be sorted by volume_threshold",
                        self.market_id
                    ));
                }
                prev = next;
            }
        }
        Ok(())
    }

    fn usdc_perp(id: u64, base: &str, tick: Decimal, lot: Decimal, max_leverage: u32) -> Self {
        Self {
            market_id: MarketId::new(id),
            symbol: format!("{}/USDC", base),
            base_asset: base.to_string(),
            quote_asset: "USDC".to_string(),
            tick_size: tick,
            lot_size: lot,
            min_size: lot,
            max_leverage,
            imr_bps: 10_000 / max_leverage,
            mmr_bps: 10_000 / max_leverage / 2,
            fee_tiers: default_fee_tiers(),
            active: true,
        }
    }

    /// BTC/USDC perpetual (market 1)
    pub fn btc_usdc() -> Self {
        Self::usdc_perp(1, "BTC", Decimal::new(1, 1), Decimal::new(1, 3), 20)
    }

    /// ETH/USDC perpetual (market 2)
    pub fn eth_usdc() -> Self {
        Self::usdc_perp(2, "ETH", Decimal::new(1, 2), Decimal::new(1, 2), 20)
    }

    /// SOL/USDC perpetual (market 3)
    pub fn sol_usdc() -> Self {
        Self::usdc_perp(3, "SOL", Decimal::new(1, 3), Decimal::new(1, 1), 10)
    }

    /// Markets listed when no configuration overrides them
    pub fn defaults() -> Vec<Self> {
        vec![Self::btc_usdc(), Self::eth_usdc(), Self::sol_usdc()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_markets_are_valid() {
        for market in MarketConfig::defaults() {
            assert!(market.check().is_ok(), "{} invalid", market.symbol);
        }
        assert_eq!(MarketConfig::btc_usdc().imr_bps, 500);
    }

    #[test]
    fn test_validate_price_tick() {
        let btc = MarketConfig::btc_usdc();
        assert!(btc.validate_price(Price::from_str("50000.1").unwrap()).is_ok());
        let err = btc.validate_price(Price::from_str("50000.15").unwrap()).unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_TICK");
    }

    #[test]
    fn test_validate_size_lot_and_minimum() {
        let btc = MarketConfig::btc_usdc();
        assert!(btc.validate_size(Quantity::from_str("0.005").unwrap()).is_ok());
        assert_eq!(
            btc.validate_size(Quantity::from_str("0.0005").unwrap()).unwrap_err().reason_code(),
            "INVALID_PARAMETERS"
        );
        assert_eq!(
            btc.validate_size(Quantity::from_str("0.0105").unwrap()).unwrap_err().reason_code(),
            "INVALID_LOT"
        );
        assert_eq!(
            btc.validate_size(Quantity::zero()).unwrap_err().reason_code(),
            "INVALID_PARAMETERS"
        );
    }

    #[test]
    fn test_check_rejects_bad_margins() {
        let mut market = MarketConfig::eth_usdc();
        market.mmr_bps = market.imr_bps + 1;
        assert!(market.check().is_err());
    }
}
