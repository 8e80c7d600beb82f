//! Record store
//!
//! Typed records over the journal: the order table, the fill log, the
//! pending freeze-quote table and the batch submission log all live in one
//! ordered stream so recovery sees them in the order they happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};
use types::freeze::{FreezeQuote, FreezeState};
use types::ids::{BatchId, OrderId};
use types::order::Order;
use types::settlement::SettlementBatch;
use types::trade::Trade;

use crate::journal::{JournalConfig, JournalError, JournalWriter};
use crate::reader::{JournalReader, ReaderError};
use crate::recovery::RecoveredState;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("journal read error: {0}")]
    Reader(#[from] ReaderError),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("record {sequence} ({kind}) does not decode: {detail}")]
    UndecodableRecord {
        sequence: u64,
        kind: String,
        detail: String,
    },

    #[error("journal writer poisoned by an earlier panic")]
    Poisoned,
}

/// Everything the engine persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", content = "data")]
pub enum StoreRecord {
    /// Latest state of an order; later records supersede earlier ones
    OrderUpserted(Order),
    TradeRecorded(Trade),
    QuoteIssued(FreezeQuote),
    QuoteClosed {
        order_id: OrderId,
        state: FreezeState,
        /// Lock transaction custody accepted for the quote, if it got that far
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx_hash: Option<String>,
    },
    /// A batch was closed (or rebuilt for a retry) and is about to be sent
    BatchBuilt(SettlementBatch),
    BatchSubmitted {
        batch_id: BatchId,
        attempt: u32,
    },
    BatchSettled {
        batch_id: BatchId,
        tx_hash: String,
    },
    /// Definite rejection; the fills go back to the pending queue
    BatchFailed {
        batch_id: BatchId,
        attempt: u32,
        reason: String,
    },
    /// Ambiguous outcome, parked for an operator
    ReconciliationRequired {
        batch_id: BatchId,
        reason: String,
    },
}

impl StoreRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreRecord::OrderUpserted(_) => "OrderUpserted",
            StoreRecord::TradeRecorded(_) => "TradeRecorded",
            StoreRecord::QuoteIssued(_) => "QuoteIssued",
            StoreRecord::QuoteClosed { .. } => "QuoteClosed",
            StoreRecord::BatchBuilt(_) => "BatchBuilt",
            StoreRecord::BatchSubmitted { .. } => "BatchSubmitted",
            StoreRecord::BatchSettled { .. } => "BatchSettled",
            StoreRecord::BatchFailed { .. } => "BatchFailed",
            StoreRecord::ReconciliationRequired { .. } => "ReconciliationRequired",
        }
    }
}

/// Durable, thread-safe record log
///
/// Writes go through a single writer guarded by a mutex; callers that must
/// keep several records together (one match outcome) use [`append_all`].
///
/// [`append_all`]: EngineStore::append_all
pub struct EngineStore {
    writer: Mutex<JournalWriter>,
}

impl EngineStore {
    /// Replay the journal in `config.dir` and open it for appending
    pub fn open(config: JournalConfig) -> Result<(Self, RecoveredState), StoreError> {
        let mut reader = JournalReader::open(&config.dir)?;
        let (entries, corruption) = reader.recover_entries()?;

        for record in &corruption {
            warn!(
                file = %record.file.display(),
                offset = record.byte_offset,
                kind = ?record.kind,
                detail = %record.detail,
                "skipped corrupted journal entry"
            );
        }
        if let Err(e) = JournalReader::validate_sequences(&entries) {
            warn!(error = %e, "journal sequence is not gapless");
        }

        let mut state = RecoveredState::default();
        for entry in &entries {
            let record: StoreRecord =
                serde_json::from_slice(&entry.payload).map_err(|e| StoreError::UndecodableRecord {
                    sequence: entry.sequence,
                    kind: entry.kind.clone(),
                    detail: e.to_string(),
                })?;
            state.apply(record);
        }
        state.last_sequence = entries.last().map_or(0, |e| e.sequence);
        state.corrupted_entries = corruption.len();

        let mut writer = JournalWriter::open(config)?;
        writer.set_next_sequence(state.last_sequence + 1);

        info!(
            records = entries.len(),
            last_sequence = state.last_sequence,
            orders = state.orders.len(),
            trades = state.trades.len(),
            segment = %writer.current_file_path().display(),
            "journal replayed"
        );

        Ok((
            Self {
                writer: Mutex::new(writer),
            },
            state,
        ))
    }

    /// Append one record, returning its journal sequence
    pub fn append(&self, record: &StoreRecord, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let payload = serde_json::to_vec(record)?;
        let mut writer = self.lock()?;
        let entry = writer.append_record(now.timestamp_millis(), record.kind(), payload)?;
        Ok(entry.sequence)
    }

    /// Append several records back to back without interleaving
    pub fn append_all(&self, records: &[StoreRecord], now: DateTime<Utc>) -> Result<(), StoreError> {
        let encoded = records
            .iter()
            .map(|r| Ok((r.kind(), serde_json::to_vec(r)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let mut writer = self.lock()?;
        for (kind, payload) in encoded {
            writer.append_record(now.timestamp_millis(), kind, payload)?;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<(), StoreError> {
        self.lock()?.sync()?;
        Ok(())
    }

    /// Fails when the journal can no longer be written
    pub fn health_check(&self) -> Result<(), StoreError> {
        self.lock()?.probe()?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, JournalWriter>, StoreError> {
        self.writer.lock().map_err(|_| StoreError::Poisoned)
    }
}
