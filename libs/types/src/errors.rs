//! Error types for the matching and admission path
//!
//! Comprehensive error taxonomy using thiserror. Every variant maps to a
//! machine-readable reason code that is surfaced to API callers unchanged.

use thiserror::Error;

/// Top-level engine error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    /// Matching on the market is refused until an operator intervenes
    #[error("Market {market_id} halted: {reason}")]
    MarketHalted { market_id: u64, reason: String },

    #[error("Invariant violated on market {market_id}: {detail}")]
    InvariantViolation { market_id: u64, detail: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl EngineError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            EngineError::Order(e) => e.reason_code(),
            EngineError::Admission(e) => e.reason_code(),
            EngineError::MarketHalted { .. } => "MARKET_HALTED",
            EngineError::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            EngineError::Storage { .. } => "STORAGE_ERROR",
        }
    }
}

/// Order validation and matching-policy errors
///
/// All of these are raised before any book mutation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Price {price} is not a multiple of tick size {tick_size}")]
    InvalidTick { price: String, tick_size: String },

    #[error("Size {size} is not a multiple of lot size {lot_size}")]
    InvalidLot { size: String, lot_size: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Missing required field: {0}")]
    InsufficientSpecification(String),

    #[error("Unknown market: {market_id}")]
    UnknownMarket { market_id: u64 },

    #[error("Post-only order would take liquidity")]
    PostOnlyWouldCross,

    #[error("Fill-or-kill order for {requested} cannot fill, only {available} available")]
    FokUnfillable { requested: String, available: String },

    #[error("Reduce-only order of {size} exceeds opposite exposure {exposure}")]
    ReduceOnlyViolation { size: String, exposure: String },

    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Order {order_id} is not cancellable in status {status}")]
    NotCancellable { order_id: String, status: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Fill would exceed order {order_id} size {size}: filled {filled}")]
    Overfill {
        order_id: String,
        size: String,
        filled: String,
    },
}

impl OrderError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            OrderError::InvalidTick { .. } => "INVALID_TICK",
            OrderError::InvalidLot { .. } => "INVALID_LOT",
            OrderError::InvalidParameters(_) => "INVALID_PARAMETERS",
            OrderError::InsufficientSpecification(_) => "INSUFFICIENT_SPECIFICATION",
            OrderError::UnknownMarket { .. } => "MARKET_UNKNOWN",
            OrderError::PostOnlyWouldCross => "POST_ONLY_WOULD_CROSS",
            OrderError::FokUnfillable { .. } => "FOK_UNFILLABLE",
            OrderError::ReduceOnlyViolation { .. } => "REDUCE_ONLY_VIOLATION",
            OrderError::NotFound { .. } => "ORDER_NOT_FOUND",
            OrderError::NotCancellable { .. } => "NOT_CANCELLABLE",
            OrderError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            OrderError::Overfill { .. } => "OVERFILL",
        }
    }
}

/// Freeze/confirm admission errors; the caller must restart the freeze flow
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    #[error("Insufficient collateral: required {required}, available {available}")]
    InsufficientCollateral { required: String, available: String },

    #[error("Freeze quote for order {order_id} expired")]
    FreezeExpired { order_id: String },

    #[error("Freeze for order {order_id} not confirmed: {reason}")]
    FreezeNotConfirmed { order_id: String, reason: String },

    #[error("No pending freeze quote for order {order_id}")]
    QuoteNotFound { order_id: String },

    #[error("Reference price unavailable for market {market_id}")]
    NoReferencePrice { market_id: u64 },

    #[error("Custody service unavailable: {0}")]
    CustodyUnavailable(String),
}

impl AdmissionError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            AdmissionError::InsufficientCollateral { .. } => "INSUFFICIENT_COLLATERAL",
            AdmissionError::FreezeExpired { .. } => "FREEZE_EXPIRED",
            AdmissionError::FreezeNotConfirmed { .. } => "FREEZE_NOT_CONFIRMED",
            AdmissionError::QuoteNotFound { .. } => "QUOTE_NOT_FOUND",
            AdmissionError::NoReferencePrice { .. } => "NO_REFERENCE_PRICE",
            AdmissionError::CustodyUnavailable(_) => "CUSTODY_UNAVAILABLE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_error_display() {
        let err = OrderError::InvalidTick {
            price: "100.3".to_string(),
            tick_size: "0.5".to_string(),
        };
        assert_eq!(err.to_string(), "Price 100.3 is not a multiple of tick size 0.5");
        assert_eq!(err.reason_code(), "INVALID_TICK");
    }

    #[test]
    fn test_unknown_market_code() {
        let err: EngineError = OrderError::UnknownMarket { market_id: 9 }.into();
        assert_eq!(err.reason_code(), "MARKET_UNKNOWN");
    }

    #[test]
    fn test_engine_error_from_admission_error() {
        let err: EngineError = AdmissionError::FreezeExpired {
            order_id: "x".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::Admission(_)));
        assert_eq!(err.reason_code(), "FREEZE_EXPIRED");
    }
}
