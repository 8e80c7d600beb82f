//! On-chain custody checks for the freeze flow

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use types::errors::AdmissionError;
use types::freeze::FreezeQuote;
use types::ids::UserAddress;

/// Tolerated gap between the node's clock and ours, in seconds
///
/// A lock transaction must not have executed more than this long before its
/// quote was issued, which bounds how long a spent hash has to be remembered.
pub const CLOCK_SKEW_SECS: u64 = 30;

#[async_trait]
pub trait CustodyVerifier: Send + Sync {
    /// Check that `tx_hash` is the committed freeze described by `quote`
    async fn verify_freeze(&self, quote: &FreezeQuote, tx_hash: &str) -> Result<(), AdmissionError>;

    /// Collateral the user could still freeze, in base units; `None` if unknown
    async fn free_collateral(&self, _user: &UserAddress) -> Result<Option<u64>, AdmissionError> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct ChainTransaction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    vm_status: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    payload: Option<EntryPayload>,
    /// Block time in microseconds
    #[serde(default)]
    timestamp: Option<String>,
}

impl ChainTransaction {
    fn executed_at(&self) -> Option<DateTime<Utc>> {
        let micros: i64 = self.timestamp.as_deref()?.parse().ok()?;
        DateTime::from_timestamp_micros(micros)
    }
}

#[derive(Debug, Deserialize)]
struct EntryPayload {
    #[serde(default)]
    function: String,
    #[serde(default)]
    arguments: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CoinStore {
    data: CoinStoreData,
}

#[derive(Debug, Deserialize)]
struct CoinStoreData {
    coin: CoinValue,
}

#[derive(Debug, Deserialize)]
struct CoinValue {
    value: String,
}

/// Custody checks against an Aptos full node REST API
pub struct AptosCustody {
    client: Client,
    node_url: String,
    coin_type: String,
}

impl AptosCustody {
    pub fn new(node_url: &str, coin_type: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            node_url: node_url.trim_end_matches('/').to_string(),
            coin_type: coin_type.into(),
        })
    }
}

#[async_trait]
impl CustodyVerifier for AptosCustody {
    async fn verify_freeze(&self, quote: &FreezeQuote, tx_hash: &str) -> Result<(), AdmissionError> {
        let url = format!("{}/transactions/by_hash/{}", self.node_url, tx_hash);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdmissionError::CustodyUnavailable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_confirmed(quote, "transaction not found"));
        }
        if !response.status().is_success() {
            return Err(AdmissionError::CustodyUnavailable(format!(
                "node returned {}",
                response.status()
            )));
        }
        let tx: ChainTransaction = response
            .json()
            .await
            .map_err(|e| AdmissionError::CustodyUnavailable(format!("unreadable transaction: {}", e)))?;
        debug!(order_id = %quote.order_id, %tx_hash, kind = %tx.kind, "fetched freeze transaction");
        check_transaction(quote, &tx)
    }

    async fn free_collateral(&self, user: &UserAddress) -> Result<Option<u64>, AdmissionError> {
        let url = format!(
            "{}/accounts/{}/resource/0x1::coin::CoinStore<{}>",
            self.node_url, user, self.coin_type
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdmissionError::CustodyUnavailable(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Some(0));
        }
        if !response.status().is_success() {
            return Err(AdmissionError::CustodyUnavailable(format!(
                "node returned {}",
                response.status()
            )));
        }
        let store: CoinStore = response
            .json()
            .await
            .map_err(|e| AdmissionError::CustodyUnavailable(format!("unreadable coin store: {}", e)))?;
        store
            .data
            .coin
            .value
            .parse()
            .map(Some)
            .map_err(|_| AdmissionError::CustodyUnavailable(format!("bad balance {}", store.data.coin.value)))
    }
}

fn check_transaction(quote: &FreezeQuote, tx: &ChainTransaction) -> Result<(), AdmissionError> {
    if tx.kind != "user_transaction" {
        return Err(not_confirmed(quote, &format!("transaction is {}", tx.kind)));
    }
    if !tx.success {
        warn!(order_id = %quote.order_id, vm_status = %tx.vm_status, "freeze transaction failed on chain");
        return Err(not_confirmed(quote, &format!("transaction failed: {}", tx.vm_status)));
    }
    if !same_address(&tx.sender, quote.intent.user_address.as_str()) {
        return Err(not_confirmed(quote, "sender does not match order owner"));
    }
    let Some(payload) = &tx.payload else {
        return Err(not_confirmed(quote, "transaction has no entry payload"));
    };
    if !payload.function.eq_ignore_ascii_case(&quote.payload.function) {
        return Err(not_confirmed(quote, &format!("unexpected function {}", payload.function)));
    }
    let arguments: Vec<String> = payload.arguments.iter().map(argument_text).collect();
    if arguments != quote.payload.arguments {
        return Err(not_confirmed(quote, "freeze arguments do not match quote"));
    }
    let Some(executed_at) = tx.executed_at() else {
        return Err(not_confirmed(quote, "transaction has no timestamp"));
    };
    if executed_at < quote.created_at - ChronoDuration::seconds(CLOCK_SKEW_SECS as i64) {
        return Err(not_confirmed(quote, "transaction predates the quote"));
    }
    Ok(())
}

fn argument_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compare account addresses ignoring case and leading zeros
fn same_address(a: &str, b: &str) -> bool {
    fn canonical(s: &str) -> String {
        let s = s.trim().to_ascii_lowercase();
        let hex = s.strip_prefix("0x").unwrap_or(&s);
        let trimmed = hex.trim_start_matches('0');
        if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }
    }
    canonical(a) == canonical(b)
}

fn not_confirmed(quote: &FreezeQuote, reason: &str) -> AdmissionError {
    AdmissionError::FreezeNotConfirmed {
        order_id: quote.order_id.to_string(),
        reason: reason.to_string(),
    }
}
