//! Settlement of matched fills
//!
//! Fills are grouped per market into batches priced against a reference band
//! and submitted to the on-chain `apply_batch` entry point.

pub mod builder;
pub mod error;
pub mod oracle;
pub mod service;
pub mod submitter;

pub use builder::{refresh, BatchBuilder, BatchPolicy};
pub use error::{OracleError, SettlementError, SubmitError};
pub use oracle::{HttpPriceFeed, PriceCache, ReferencePrice, ReferencePriceSource};
pub use service::{SettlementConfig, SettlementHandle, SettlementMetrics, SettlementService, SettlementStats};
pub use submitter::{BatchWire, FillWire, HttpSettlementSink, SettlementSink, WIRE_SCALE};
