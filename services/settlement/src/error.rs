use thiserror::Error;

/// Batch construction failures; every variant leaves the fills queued
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("fill for market {got} appended to builder of market {expected}")]
    WrongMarket { expected: u64, got: u64 },

    #[error("reference price for market {market_id} is {age_secs}s old")]
    StaleReference { market_id: u64, age_secs: i64 },

    #[error("fill {trade_id} at {price} outside band [{min_price}, {max_price}]")]
    PriceOutOfBand {
        trade_id: String,
        price: String,
        min_price: String,
        max_price: String,
    },

    #[error("no reference price: {0}")]
    NoReference(#[from] OracleError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("no reference price known for market {0}")]
    Unknown(u64),

    #[error("price feed unavailable: {0}")]
    Unavailable(String),

    #[error("malformed price feed response: {0}")]
    Malformed(String),
}

/// Outcome classes of one `apply_batch` call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmitError {
    /// The request never left this process
    #[error("batch not sent: {0}")]
    NotSent(String),

    /// The settlement service answered and applied nothing
    #[error("batch rejected: {0}")]
    Rejected(String),

    /// Sent, but the outcome is unknown
    #[error("batch outcome unknown: {0}")]
    Ambiguous(String),

    #[error("batch cannot be encoded: {0}")]
    Encoding(String),
}

impl SubmitError {
    /// Whether it is certain that no fill of the batch was settled
    pub fn is_definite(&self) -> bool {
        !matches!(self, SubmitError::Ambiguous(_))
    }
}
