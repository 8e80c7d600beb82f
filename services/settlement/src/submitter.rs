//! Batch submission to the on-chain settlement entry point
//!
//! Amounts cross the wire as unsigned integers scaled by 1e8 and encoded as
//! decimal strings, since u128 does not survive JSON number parsing on the
//! other side. The band is rounded inwards so the chain never accepts a
//! price the engine's band would have refused.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use types::settlement::SettlementBatch;
use types::trade::Trade;

use crate::error::SubmitError;

/// Fixed-point scale of prices and sizes on the wire
pub const WIRE_SCALE: u64 = 100_000_000;

#[async_trait]
pub trait SettlementSink: Send + Sync {
    /// Apply a batch on chain; returns the transaction hash
    async fn apply_batch(&self, batch: &SettlementBatch) -> Result<String, SubmitError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillWire {
    pub taker: String,
    pub maker: String,
    pub market_id: u64,
    #[serde(with = "u128_string")]
    pub size: u128,
    #[serde(with = "u128_string")]
    pub price_x: u128,
    pub fee_bps: u64,
    /// Unix seconds
    pub ts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWire {
    pub fills: Vec<FillWire>,
    pub oracle_ts: u64,
    #[serde(with = "u128_string")]
    pub min_px: u128,
    #[serde(with = "u128_string")]
    pub max_px: u128,
    pub expiry: u64,
}

impl BatchWire {
    pub fn encode(batch: &SettlementBatch) -> Result<Self, SubmitError> {
        let fills = batch.fills.iter().map(encode_fill).collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            fills,
            oracle_ts: unix_secs(batch.oracle_ts.timestamp())?,
            min_px: scaled(batch.band.min_price, Rounding::Up)?,
            max_px: scaled(batch.band.max_price, Rounding::Down)?,
            expiry: unix_secs(batch.expiry.timestamp())?,
        })
    }
}

fn encode_fill(trade: &Trade) -> Result<FillWire, SubmitError> {
    Ok(FillWire {
        taker: trade.taker_address.to_string(),
        maker: trade.maker_address.to_string(),
        market_id: trade.market_id.as_u64(),
        size: scaled(trade.size.as_decimal(), Rounding::Down)?,
        price_x: scaled(trade.price.as_decimal(), Rounding::Down)?,
        fee_bps: u64::from(trade.fee_bps),
        ts: unix_secs(trade.created_at.timestamp())?,
    })
}

#[derive(Clone, Copy)]
enum Rounding {
    Up,
    Down,
}

fn scaled(value: Decimal, rounding: Rounding) -> Result<u128, SubmitError> {
    let raw = value
        .checked_mul(Decimal::from(WIRE_SCALE))
        .ok_or_else(|| SubmitError::Encoding(format!("{} overflows wire scale", value)))?;
    let rounded = match rounding {
        Rounding::Up => raw.ceil(),
        Rounding::Down => raw.floor(),
    };
    rounded
        .to_u128()
        .ok_or_else(|| SubmitError::Encoding(format!("{} is not a wire amount", value)))
}

fn unix_secs(ts: i64) -> Result<u64, SubmitError> {
    u64::try_from(ts).map_err(|_| SubmitError::Encoding(format!("timestamp {} before epoch", ts)))
}

mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize)]
struct ApplyBatchRequest<'a> {
    function: &'a str,
    batch: BatchWire,
}

#[derive(Debug, Deserialize)]
struct ApplyBatchResponse {
    success: bool,
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Posts batches to a transaction relay that signs and submits
/// `{contract}::perp_engine::apply_batch`
pub struct HttpSettlementSink {
    client: Client,
    relay_url: String,
    function: String,
}

impl HttpSettlementSink {
    pub fn new(relay_url: impl Into<String>, contract_address: &str, timeout: Duration) -> Result<Self, SubmitError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubmitError::NotSent(e.to_string()))?;
        Ok(Self {
            client,
            relay_url: relay_url.into(),
            function: format!("{}::perp_engine::apply_batch", contract_address),
        })
    }

    pub fn function(&self) -> &str {
        &self.function
    }
}

#[async_trait]
impl SettlementSink for HttpSettlementSink {
    async fn apply_batch(&self, batch: &SettlementBatch) -> Result<String, SubmitError> {
        let request = ApplyBatchRequest {
            function: &self.function,
            batch: BatchWire::encode(batch)?,
        };
        debug!(batch_id = %batch.id, fills = batch.fills.len(), "posting settlement batch");

        let response = self
            .client
            .post(&self.relay_url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SubmitError::Ambiguous(format!("relay returned {}", status)));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubmitError::Rejected(format!("relay returned {}: {}", status, body)));
        }

        // The relay accepted the request; an unreadable answer leaves the outcome open
        let body: ApplyBatchResponse = response
            .json()
            .await
            .map_err(|e| SubmitError::Ambiguous(format!("unreadable relay response: {}", e)))?;
        match (body.success, body.tx_hash) {
            (true, Some(hash)) => Ok(hash),
            (true, None) => Err(SubmitError::Ambiguous("success without transaction hash".to_string())),
            (false, _) => {
                let reason = body.error.unwrap_or_else(|| "unspecified".to_string());
                warn!(batch_id = %batch.id, %reason, "settlement batch rejected");
                Err(SubmitError::Rejected(reason))
            }
        }
    }
}

fn classify_transport_error(e: reqwest::Error) -> SubmitError {
    if e.is_connect() || e.is_builder() {
        SubmitError::NotSent(e.to_string())
    } else {
        SubmitError::Ambiguous(e.to_string())
    }
}
