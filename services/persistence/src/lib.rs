//! Persistence Service
//!
//! Append-only journal with CRC32C-checked frames, a typed record store on
//! top of it, and crash recovery that folds the records back into the state
//! the engine needs on start-up.
//!
//! Persisted tables (all in one ordered log):
//! - order table (`OrderUpserted`, latest wins)
//! - fill log (`TradeRecorded`)
//! - pending freeze quotes (`QuoteIssued` / `QuoteClosed`)
//! - batch submission log (`BatchBuilt`, `BatchSubmitted`, `BatchSettled`,
//!   `BatchFailed`, `ReconciliationRequired`)

pub mod journal;
pub mod reader;
pub mod recovery;
pub mod store;

pub use journal::{FlushPolicy, FsyncPolicy, JournalConfig};
pub use recovery::{RecoveredState, SpentTransaction};
pub use store::{EngineStore, StoreError, StoreRecord};
