//! Market registry
//!
//! Static per-market parameters, loaded once at start-up and read by the
//! engine, the freeze coordinator and the HTTP surface.

use std::collections::BTreeMap;
use thiserror::Error;
use types::errors::OrderError;
use types::ids::MarketId;
use types::market::MarketConfig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("market {0} configured twice")]
    Duplicate(MarketId),

    #[error("invalid market configuration: {0}")]
    Invalid(String),

    #[error("no markets configured")]
    Empty,
}

/// Configured markets keyed by id
#[derive(Debug, Clone)]
pub struct MarketRegistry {
    markets: BTreeMap<MarketId, MarketConfig>,
}

impl MarketRegistry {
    /// Build a registry, validating every market
    pub fn new(configs: Vec<MarketConfig>) -> Result<Self, RegistryError> {
        if configs.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut markets = BTreeMap::new();
        for config in configs {
            config.check().map_err(RegistryError::Invalid)?;
            let id = config.market_id;
            if markets.insert(id, config).is_some() {
                return Err(RegistryError::Duplicate(id));
            }
        }
        Ok(Self { markets })
    }

    /// Look up a market; unknown ids map to `MARKET_UNKNOWN`
    pub fn get(&self, market_id: MarketId) -> Result<&MarketConfig, OrderError> {
        self.markets
            .get(&market_id)
            .ok_or(OrderError::UnknownMarket {
                market_id: market_id.as_u64(),
            })
    }

    /// Like [`get`](Self::get) but also refuses inactive markets
    pub fn get_active(&self, market_id: MarketId) -> Result<&MarketConfig, OrderError> {
        let market = self.get(market_id)?;
        if !market.active {
            return Err(OrderError::InvalidParameters(format!(
                "market {} is not accepting orders",
                market_id
            )));
        }
        Ok(market)
    }

    pub fn contains(&self, market_id: MarketId) -> bool {
        self.markets.contains_key(&market_id)
    }

    /// All markets in id order
    pub fn list(&self) -> impl Iterator<Item = &MarketConfig> {
        self.markets.values()
    }

    pub fn ids(&self) -> Vec<MarketId> {
        self.markets.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

impl Default for MarketRegistry {
    fn default() -> Self {
        let markets = MarketConfig::defaults()
            .into_iter()
            .map(|m| (m.market_id, m))
            .collect();
        Self { markets }
    }
}
