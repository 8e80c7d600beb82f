//! Settlement service against scripted sinks and a real journal

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use persistence::{EngineStore, JournalConfig, StoreRecord};
use settlement::{
    BatchPolicy, PriceCache, ReferencePrice, SettlementConfig, SettlementService, SettlementSink, SubmitError,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use types::ids::{BatchId, MarketId, OrderId, TradeId, UserAddress};
use types::numeric::{Price, Quantity};
use types::order::Side;
use types::settlement::{BatchStatus, SettlementBatch};
use types::trade::Trade;

/// Sink answering from a script; records every batch it sees
#[derive(Default)]
struct ScriptedSink {
    script: Mutex<VecDeque<Result<String, SubmitError>>>,
    seen: Mutex<Vec<SettlementBatch>>,
    delay: Option<Duration>,
}

impl ScriptedSink {
    fn new(script: Vec<Result<String, SubmitError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    fn seen(&self) -> Vec<SettlementBatch> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SettlementSink for ScriptedSink {
    async fn apply_batch(&self, batch: &SettlementBatch) -> Result<String, SubmitError> {
        self.seen.lock().unwrap().push(batch.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("0xhash".to_string()))
    }
}

fn fill(price: u64, at: DateTime<Utc>) -> Trade {
    Trade {
        id: TradeId::new(),
        sequence: 1,
        market_id: MarketId::new(1),
        taker_order_id: OrderId::new(),
        maker_order_id: OrderId::new(),
        taker_address: UserAddress::try_new("0xtaker").unwrap(),
        maker_address: UserAddress::try_new("0xmaker").unwrap(),
        size: Quantity::from_u64(1),
        price: Price::from_u64(price),
        side: Side::Buy,
        fee_bps: 5,
        maker_fee_bps: 2,
        created_at: at,
    }
}

fn config() -> SettlementConfig {
    SettlementConfig {
        policy: BatchPolicy {
            max_fills: 10,
            band_bps: 300,
            ..BatchPolicy::default()
        },
        submit_timeout: Duration::from_secs(5),
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        ..SettlementConfig::default()
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<EngineStore>,
    prices: Arc<PriceCache>,
    now: DateTime<Utc>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let (store, _) = EngineStore::open(JournalConfig::new(dir.path())).unwrap();
        let prices = Arc::new(PriceCache::new());
        let now = Utc::now();
        prices.set(ReferencePrice {
            market_id: MarketId::new(1),
            price: Price::from_u64(100),
            timestamp: now,
        });
        Self {
            dir,
            store: Arc::new(store),
            prices,
            now,
        }
    }

    fn service(&self, sink: Arc<ScriptedSink>, config: SettlementConfig) -> (SettlementService, settlement::SettlementHandle) {
        SettlementService::new(config, self.prices.clone(), sink, Some(self.store.clone()))
    }

    /// Journal fills the way the matching path does, then hand them over
    fn record(&self, fills: &[Trade]) {
        for trade in fills {
            self.store.append(&StoreRecord::TradeRecorded(trade.clone()), self.now).unwrap();
        }
    }

    fn reopen(self) -> persistence::RecoveredState {
        let Harness { dir, store, .. } = self;
        drop(store);
        let (_, recovered) = EngineStore::open(JournalConfig::new(dir.path())).unwrap();
        recovered
    }
}

#[tokio::test]
async fn test_batch_settles_and_is_journaled() {
    let harness = Harness::new();
    let sink = ScriptedSink::new(vec![Ok("0xabc".to_string())]);
    let (mut service, handle) = harness.service(sink.clone(), config());

    let fills = vec![fill(101, harness.now), fill(99, harness.now)];
    harness.record(&fills);
    assert!(handle.enqueue(fills));
    service.drain_incoming(harness.now);
    assert_eq!(service.pending_fills(), 2);

    service.flush_market(MarketId::new(1), harness.now).await;

    assert_eq!(sink.seen().len(), 1);
    assert_eq!(sink.seen()[0].fills.len(), 2);
    let stats = service.metrics().snapshot();
    assert_eq!(stats.settled_batches, 1);
    assert_eq!(stats.settled_fills, 2);
    assert_eq!(stats.pending_fills, 0);

    let recovered = harness.reopen();
    assert!(recovered.unsettled_trades().is_empty());
    assert!(recovered.reconciliation_batches().is_empty());
    assert!(recovered.batches.values().all(|b| b.status == BatchStatus::Settled));
}

#[tokio::test]
async fn test_rejection_retries_same_fills_with_fresh_attempt() {
    let harness = Harness::new();
    let sink = ScriptedSink::new(vec![
        Err(SubmitError::Rejected("E_STALE_ORACLE".to_string())),
        Ok("0xdef".to_string()),
    ]);
    let (mut service, handle) = harness.service(sink.clone(), config());

    let fills = vec![fill(100, harness.now)];
    harness.record(&fills);
    handle.enqueue(fills);
    service.drain_incoming(harness.now);
    service.flush_market(MarketId::new(1), harness.now).await;

    let seen = sink.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].id, seen[1].id);
    assert_eq!(seen[0].trade_ids(), seen[1].trade_ids());
    assert_eq!(seen[0].attempt, 1);
    assert_eq!(seen[1].attempt, 2);
    assert!(seen[1].expiry >= seen[0].expiry);
    assert_eq!(service.metrics().snapshot().failed_attempts, 1);

    let recovered = harness.reopen();
    assert!(recovered.unsettled_trades().is_empty());
}

#[tokio::test]
async fn test_ambiguous_outcome_is_parked_not_retried() {
    let harness = Harness::new();
    let sink = ScriptedSink::new(vec![Err(SubmitError::Ambiguous("connection reset".to_string()))]);
    let (mut service, handle) = harness.service(sink.clone(), config());

    let fills = vec![fill(100, harness.now), fill(102, harness.now)];
    harness.record(&fills);
    handle.enqueue(fills);
    service.drain_incoming(harness.now);
    service.flush_market(MarketId::new(1), harness.now).await;

    assert_eq!(sink.seen().len(), 1);
    assert_eq!(service.parked().len(), 1);
    assert_eq!(service.pending_fills(), 0);

    let recovered = harness.reopen();
    // Parked fills are neither resubmitted nor lost
    assert!(recovered.unsettled_trades().is_empty());
    let parked = recovered.reconciliation_batches();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].status, BatchStatus::NeedsReconciliation);
    assert_eq!(parked[0].fills.len(), 2);
}

#[tokio::test]
async fn test_out_of_band_fill_blocks_flush() {
    let harness = Harness::new();
    let sink = ScriptedSink::new(vec![]);
    let (mut service, handle) = harness.service(sink.clone(), config());

    // Band around 100 at 300 bps is [97, 103]
    let fills = vec![fill(100, harness.now), fill(105, harness.now)];
    harness.record(&fills);
    handle.enqueue(fills);
    service.drain_incoming(harness.now);
    service.flush_market(MarketId::new(1), harness.now).await;

    assert!(sink.seen().is_empty());
    assert_eq!(service.pending_fills(), 2);

    let recovered = harness.reopen();
    assert_eq!(recovered.unsettled_trades().len(), 2);
}

#[tokio::test]
async fn test_exhausted_attempts_requeue_fills() {
    let harness = Harness::new();
    let sink = ScriptedSink::new(vec![
        Err(SubmitError::NotSent("refused".to_string())),
        Err(SubmitError::Rejected("abort".to_string())),
        Err(SubmitError::Rejected("abort".to_string())),
    ]);
    let (mut service, handle) = harness.service(sink.clone(), config());

    let fills = vec![fill(100, harness.now)];
    harness.record(&fills);
    handle.enqueue(fills);
    service.drain_incoming(harness.now);
    service.flush_market(MarketId::new(1), harness.now).await;

    assert_eq!(sink.seen().len(), 3);
    assert_eq!(service.pending_fills(), 1);
    assert_eq!(service.metrics().snapshot().pending_fills, 1);

    let recovered = harness.reopen();
    assert_eq!(recovered.unsettled_trades().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_submission_timeout_is_ambiguous() {
    let harness = Harness::new();
    let sink = Arc::new(ScriptedSink {
        delay: Some(Duration::from_secs(60)),
        ..Default::default()
    });
    let (mut service, handle) = harness.service(sink.clone(), config());

    let fills = vec![fill(100, harness.now)];
    harness.record(&fills);
    handle.enqueue(fills);
    service.drain_incoming(harness.now);
    service.flush_market(MarketId::new(1), harness.now).await;

    assert_eq!(sink.seen().len(), 1);
    assert_eq!(service.parked().len(), 1);
    assert_eq!(service.metrics().snapshot().parked_batches, 1);
}

#[tokio::test]
async fn test_restore_requeues_and_parks() {
    let harness = Harness::new();
    let sink = ScriptedSink::new(vec![]);
    let (mut service, _handle) = harness.service(sink.clone(), config());

    let parked = SettlementBatch {
        id: BatchId::new(),
        market_id: MarketId::new(1),
        fills: vec![fill(100, harness.now)],
        oracle_ts: harness.now,
        reference_price: Price::from_u64(100),
        band: types::settlement::PriceBand::around(Price::from_u64(100), 300),
        expiry: harness.now,
        attempt: 1,
        status: BatchStatus::Submitted,
        created_at: harness.now,
    };
    service.restore(vec![fill(100, harness.now), fill(101, harness.now)], vec![parked], harness.now);

    assert_eq!(service.pending_fills(), 2);
    assert_eq!(service.parked().len(), 1);

    service.flush_market(MarketId::new(1), harness.now).await;
    assert_eq!(sink.seen().len(), 1);
    assert_eq!(sink.seen()[0].fills.len(), 2);
}
