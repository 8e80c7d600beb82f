//! Settlement service loop
//!
//! Fills arrive over an unbounded channel so the matching path never waits
//! on settlement. The loop batches them per market, stamps each batch from
//! the reference price source and sends it to the sink with a time box.
//!
//! Every step is journaled before it happens: `BatchBuilt` before the batch
//! can be sent, `BatchSubmitted` before the call, then the outcome. A batch
//! whose outcome is unknown is parked for reconciliation and never resent.

use chrono::{DateTime, Utc};
use persistence::{EngineStore, StoreRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use types::ids::MarketId;
use types::settlement::SettlementBatch;
use types::trade::Trade;

use crate::builder::{refresh, BatchBuilder, BatchPolicy};
use crate::error::{SettlementError, SubmitError};
use crate::oracle::ReferencePriceSource;
use crate::submitter::SettlementSink;

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementConfig {
    pub policy: BatchPolicy,
    /// How often the loop checks for due batches
    pub tick: std::time::Duration,
    pub submit_timeout: std::time::Duration,
    /// Attempts per batch before its fills go back to the queue
    pub max_attempts: u32,
    pub backoff_base: std::time::Duration,
    pub backoff_max: std::time::Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            policy: BatchPolicy::default(),
            tick: std::time::Duration::from_millis(500),
            submit_timeout: std::time::Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: std::time::Duration::from_millis(250),
            backoff_max: std::time::Duration::from_secs(5),
        }
    }
}

impl SettlementConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Counters exposed on the health endpoint
#[derive(Debug, Default)]
pub struct SettlementMetrics {
    pending_fills: AtomicU64,
    settled_batches: AtomicU64,
    settled_fills: AtomicU64,
    failed_attempts: AtomicU64,
    parked_batches: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettlementStats {
    pub pending_fills: u64,
    pub settled_batches: u64,
    pub settled_fills: u64,
    pub failed_attempts: u64,
    pub parked_batches: u64,
}

impl SettlementMetrics {
    pub fn snapshot(&self) -> SettlementStats {
        SettlementStats {
            pending_fills: self.pending_fills.load(Ordering::Relaxed),
            settled_batches: self.settled_batches.load(Ordering::Relaxed),
            settled_fills: self.settled_fills.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            parked_batches: self.parked_batches.load(Ordering::Relaxed),
        }
    }
}

/// Producer side handed to the matching path
#[derive(Debug, Clone)]
pub struct SettlementHandle {
    tx: mpsc::UnboundedSender<Trade>,
}

impl SettlementHandle {
    /// Queue fills for settlement; never blocks
    ///
    /// Returns false once the service has stopped. The fills are in the
    /// journal already and are picked up again on restart.
    pub fn enqueue<I>(&self, fills: I) -> bool
    where
        I: IntoIterator<Item = Trade>,
    {
        for fill in fills {
            if self.tx.send(fill).is_err() {
                return false;
            }
        }
        true
    }
}

pub struct SettlementService {
    config: SettlementConfig,
    builders: HashMap<MarketId, BatchBuilder>,
    source: Arc<dyn ReferencePriceSource>,
    sink: Arc<dyn SettlementSink>,
    store: Option<Arc<EngineStore>>,
    metrics: Arc<SettlementMetrics>,
    parked: Vec<SettlementBatch>,
    rx: mpsc::UnboundedReceiver<Trade>,
}

impl SettlementService {
    pub fn new(
        config: SettlementConfig,
        source: Arc<dyn ReferencePriceSource>,
        sink: Arc<dyn SettlementSink>,
        store: Option<Arc<EngineStore>>,
    ) -> (Self, SettlementHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            config,
            builders: HashMap::new(),
            source,
            sink,
            store,
            metrics: Arc::new(SettlementMetrics::default()),
            parked: Vec::new(),
            rx,
        };
        (service, SettlementHandle { tx })
    }

    pub fn metrics(&self) -> Arc<SettlementMetrics> {
        self.metrics.clone()
    }

    /// Batches waiting for reconciliation
    pub fn parked(&self) -> &[SettlementBatch] {
        &self.parked
    }

    pub fn pending_fills(&self) -> usize {
        self.builders.values().map(BatchBuilder::pending_len).sum()
    }

    /// Seed the queue from recovered state
    pub fn restore(&mut self, unsettled: Vec<Trade>, parked: Vec<SettlementBatch>, now: DateTime<Utc>) {
        info!(fills = unsettled.len(), parked = parked.len(), "restoring settlement queue");
        for fill in unsettled {
            self.accept(fill, now);
        }
        for batch in &parked {
            error!(batch_id = %batch.id, market_id = %batch.market_id, fills = batch.fills.len(),
                "batch outcome unknown from previous run, awaiting reconciliation");
        }
        self.metrics.parked_batches.fetch_add(parked.len() as u64, Ordering::Relaxed);
        self.parked.extend(parked);
    }

    fn accept(&mut self, fill: Trade, now: DateTime<Utc>) {
        let policy = self.config.policy.clone();
        let builder = self
            .builders
            .entry(fill.market_id)
            .or_insert_with(|| BatchBuilder::new(fill.market_id, policy));
        // Keyed by the fill's market, so append cannot refuse it
        if let Err(e) = builder.append(fill, now) {
            error!(error = %e, "fill routed to wrong batch builder");
            return;
        }
        self.metrics.pending_fills.fetch_add(1, Ordering::Relaxed);
    }

    /// Run until `shutdown` resolves or every handle is dropped
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!("settlement service started");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.flush_due(Utc::now()).await,
                fill = self.rx.recv() => match fill {
                    Some(fill) => self.accept(fill, Utc::now()),
                    None => break,
                },
            }
        }

        info!(pending = self.pending_fills(), parked = self.parked.len(), "settlement service stopped");
    }

    /// Drain queued fills without waiting
    pub fn drain_incoming(&mut self, now: DateTime<Utc>) {
        while let Ok(fill) = self.rx.try_recv() {
            self.accept(fill, now);
        }
    }

    /// Flush every market whose batch is due
    pub async fn flush_due(&mut self, now: DateTime<Utc>) {
        let due: Vec<MarketId> = self
            .builders
            .iter()
            .filter(|(_, b)| b.should_flush(now))
            .map(|(id, _)| *id)
            .collect();
        for market_id in due {
            self.flush_market(market_id, now).await;
        }
    }

    /// Close and submit one batch for `market_id`
    pub async fn flush_market(&mut self, market_id: MarketId, now: DateTime<Utc>) {
        let reference = match self.source.reference_price(market_id).await {
            Ok(reference) => reference,
            Err(e) => {
                warn!(%market_id, error = %e, "no reference price, batch deferred");
                return;
            }
        };
        let Some(builder) = self.builders.get_mut(&market_id) else {
            return;
        };
        let batch = match builder.flush(&reference, now) {
            Ok(Some(batch)) => batch,
            Ok(None) => return,
            Err(e) => {
                warn!(%market_id, error = %e, "batch flush refused");
                return;
            }
        };
        self.metrics
            .pending_fills
            .fetch_sub(batch.fills.len() as u64, Ordering::Relaxed);
        self.submit_with_retry(batch, now).await;
    }

    async fn submit_with_retry(&mut self, mut batch: SettlementBatch, now: DateTime<Utc>) {
        loop {
            if let Err(e) = self.journal(&StoreRecord::BatchBuilt(batch.clone()), now) {
                error!(batch_id = %batch.id, error = %e, "cannot journal batch, fills requeued");
                self.requeue(batch, now);
                return;
            }
            if let Err(e) = self.journal(
                &StoreRecord::BatchSubmitted { batch_id: batch.id, attempt: batch.attempt },
                now,
            ) {
                error!(batch_id = %batch.id, error = %e, "cannot journal submission, fills requeued");
                self.requeue(batch, now);
                return;
            }

            debug!(batch_id = %batch.id, attempt = batch.attempt, fills = batch.fills.len(), "submitting batch");
            let outcome = match tokio::time::timeout(self.config.submit_timeout, self.sink.apply_batch(&batch)).await {
                Ok(result) => result,
                Err(_) => Err(SubmitError::Ambiguous(format!(
                    "no answer within {:?}",
                    self.config.submit_timeout
                ))),
            };

            match outcome {
                Ok(tx_hash) => {
                    info!(batch_id = %batch.id, market_id = %batch.market_id, fills = batch.fills.len(),
                        %tx_hash, "batch settled");
                    if let Err(e) = self.journal(&StoreRecord::BatchSettled { batch_id: batch.id, tx_hash }, now) {
                        // On restart the batch reads as Submitted and is parked, never resent
                        error!(batch_id = %batch.id, error = %e, "cannot journal settlement");
                    }
                    self.metrics.settled_batches.fetch_add(1, Ordering::Relaxed);
                    self.metrics
                        .settled_fills
                        .fetch_add(batch.fills.len() as u64, Ordering::Relaxed);
                    return;
                }
                Err(e) if e.is_definite() => {
                    self.metrics.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    warn!(batch_id = %batch.id, attempt = batch.attempt, error = %e, "batch attempt failed");
                    let failed = StoreRecord::BatchFailed {
                        batch_id: batch.id,
                        attempt: batch.attempt,
                        reason: e.to_string(),
                    };
                    if let Err(e) = self.journal(&failed, now) {
                        error!(batch_id = %batch.id, error = %e, "cannot journal batch failure");
                    }
                    if batch.attempt >= self.config.max_attempts {
                        warn!(batch_id = %batch.id, "attempts exhausted, fills requeued");
                        self.requeue(batch, now);
                        return;
                    }

                    tokio::time::sleep(self.config.backoff(batch.attempt)).await;
                    let now = Utc::now();
                    match self.rebuild(&batch, now).await {
                        Ok(next) => batch = next,
                        Err(e) => {
                            warn!(batch_id = %batch.id, error = %e, "cannot rebuild batch, fills requeued");
                            self.requeue(batch, now);
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!(batch_id = %batch.id, market_id = %batch.market_id, fills = batch.fills.len(),
                        error = %e, "batch outcome unknown, parked for reconciliation");
                    let record = StoreRecord::ReconciliationRequired {
                        batch_id: batch.id,
                        reason: e.to_string(),
                    };
                    if let Err(e) = self.journal(&record, now) {
                        error!(batch_id = %batch.id, error = %e, "cannot journal reconciliation event");
                    }
                    self.metrics.parked_batches.fetch_add(1, Ordering::Relaxed);
                    self.parked.push(batch);
                    return;
                }
            }
        }
    }

    async fn rebuild(&self, batch: &SettlementBatch, now: DateTime<Utc>) -> Result<SettlementBatch, SettlementError> {
        let reference = self.source.reference_price(batch.market_id).await?;
        refresh(batch, &reference, &self.config.policy, now)
    }

    fn requeue(&mut self, batch: SettlementBatch, now: DateTime<Utc>) {
        let count = batch.fills.len() as u64;
        let policy = self.config.policy.clone();
        self.builders
            .entry(batch.market_id)
            .or_insert_with(|| BatchBuilder::new(batch.market_id, policy))
            .requeue(batch.fills, now);
        self.metrics.pending_fills.fetch_add(count, Ordering::Relaxed);
    }

    fn journal(&self, record: &StoreRecord, now: DateTime<Utc>) -> Result<(), persistence::StoreError> {
        match &self.store {
            Some(store) => store.append(record, now).map(|_| ()),
            None => Ok(()),
        }
    }
}
