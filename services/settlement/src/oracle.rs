//! Reference price sources for batch price bands

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use types::ids::MarketId;
use types::numeric::Price;
use types::trade::Trade;

use crate::error::OracleError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePrice {
    pub market_id: MarketId,
    pub price: Price,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ReferencePriceSource: Send + Sync {
    async fn reference_price(&self, market_id: MarketId) -> Result<ReferencePrice, OracleError>;
}

/// In-process reference prices, fed by fills or set directly
#[derive(Debug, Default)]
pub struct PriceCache {
    prices: RwLock<HashMap<MarketId, ReferencePrice>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, reference: ReferencePrice) {
        let mut prices = self.prices.write().unwrap_or_else(|p| p.into_inner());
        prices.insert(reference.market_id, reference);
    }

    pub fn observe_trade(&self, trade: &Trade) {
        self.set(ReferencePrice {
            market_id: trade.market_id,
            price: trade.price,
            timestamp: trade.created_at,
        });
    }

    pub fn get(&self, market_id: MarketId) -> Option<ReferencePrice> {
        let prices = self.prices.read().unwrap_or_else(|p| p.into_inner());
        prices.get(&market_id).copied()
    }
}

#[async_trait]
impl ReferencePriceSource for PriceCache {
    async fn reference_price(&self, market_id: MarketId) -> Result<ReferencePrice, OracleError> {
        self.get(market_id).ok_or(OracleError::Unknown(market_id.as_u64()))
    }
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
    /// Unix seconds
    timestamp: i64,
}

/// Oracle over HTTP: `GET {base}/prices/{market_id}`
pub struct HttpPriceFeed {
    client: Client,
    base_url: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReferencePriceSource for HttpPriceFeed {
    async fn reference_price(&self, market_id: MarketId) -> Result<ReferencePrice, OracleError> {
        let url = format!("{}/prices/{}", self.base_url, market_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OracleError::Unavailable(format!("{} returned {}", url, response.status())));
        }
        let body: PriceResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        parse_price_response(market_id, body)
    }
}

fn parse_price_response(market_id: MarketId, body: PriceResponse) -> Result<ReferencePrice, OracleError> {
    let price = Price::from_str(&body.price).map_err(|e| OracleError::Malformed(e.to_string()))?;
    let timestamp = Utc
        .timestamp_opt(body.timestamp, 0)
        .single()
        .ok_or_else(|| OracleError::Malformed(format!("bad timestamp {}", body.timestamp)))?;
    Ok(ReferencePrice {
        market_id,
        price,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_unknown_market() {
        let cache = PriceCache::new();
        let err = cache.reference_price(MarketId::new(9)).await.unwrap_err();
        assert_eq!(err, OracleError::Unknown(9));
    }

    #[tokio::test]
    async fn test_cache_returns_latest() {
        let cache = PriceCache::new();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        cache.set(ReferencePrice { market_id: MarketId::new(1), price: Price::from_u64(100), timestamp: at });
        cache.set(ReferencePrice { market_id: MarketId::new(1), price: Price::from_u64(102), timestamp: at });
        let got = cache.reference_price(MarketId::new(1)).await.unwrap();
        assert_eq!(got.price, Price::from_u64(102));
    }

    #[test]
    fn test_parse_price_response() {
        let body: PriceResponse = serde_json::from_str(r#"{"price":"50000.5","timestamp":1700000000}"#).unwrap();
        let reference = parse_price_response(MarketId::new(1), body).unwrap();
        assert_eq!(reference.price, Price::from_str("50000.5").unwrap());
        assert_eq!(reference.timestamp.timestamp(), 1_700_000_000);

        let body: PriceResponse = serde_json::from_str(r#"{"price":"-1","timestamp":1700000000}"#).unwrap();
        assert!(parse_price_response(MarketId::new(1), body).is_err());
    }
}
