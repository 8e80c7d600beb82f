//! Freeze → Confirm admission
//!
//! An order goes live only after the chain has locked its collateral.
//! `request_freeze` validates the intent and hands back a quote carrying the
//! unsigned lock transaction; `confirm` checks the signed transaction with
//! the custody layer and releases the intent for admission. Neither step
//! touches an order book, and custody I/O happens before any market lock.

pub mod collateral;
pub mod custody;
pub mod quote;

use chrono::{DateTime, Duration, Utc};
use matching_engine::MarketRegistry;
use persistence::{EngineStore, RecoveredState, StoreRecord};
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::errors::{AdmissionError, EngineError, OrderError};
use types::freeze::{FreezeQuote, FreezeState, FreezeTransactionPayload};
use types::ids::OrderId;
use types::numeric::Price;
use types::order::{OrderIntent, OrderKind};

pub use collateral::required_collateral;
pub use custody::{AptosCustody, CustodyVerifier};
pub use quote::QuoteBook;

const SIGN_MESSAGE: &str = "Please sign the freeze transaction with your wallet to confirm the order";

/// How quotes are priced and what lock transaction they ask for
#[derive(Debug, Clone)]
pub struct QuotePolicy {
    pub ttl: Duration,
    pub collateral_decimals: u32,
    pub coin_type: String,
    pub contract_address: String,
    pub gas_limit: u64,
    pub gas_unit_price: u64,
    pub check_free_collateral: bool,
    /// How long expired quotes and spent lock transactions are remembered
    pub retention: Duration,
}

impl QuotePolicy {
    fn payload(&self, intent: &OrderIntent, collateral: u64) -> FreezeTransactionPayload {
        FreezeTransactionPayload {
            function: format!("{}::vault::freeze_funds", self.contract_address),
            type_arguments: vec![self.coin_type.clone()],
            arguments: vec![collateral.to_string(), intent.market_id.to_string()],
            gas_limit: self.gas_limit,
            gas_unit_price: self.gas_unit_price,
        }
    }
}

pub struct FreezeCoordinator {
    registry: Arc<MarketRegistry>,
    quotes: QuoteBook,
    custody: Arc<dyn CustodyVerifier>,
    store: Option<Arc<EngineStore>>,
    policy: QuotePolicy,
}

impl FreezeCoordinator {
    pub fn new(
        registry: Arc<MarketRegistry>,
        custody: Arc<dyn CustodyVerifier>,
        store: Option<Arc<EngineStore>>,
        policy: QuotePolicy,
    ) -> Self {
        Self {
            registry,
            quotes: QuoteBook::new(),
            custody,
            store,
            policy,
        }
    }

    pub fn pending(&self) -> usize {
        self.quotes.len()
    }

    pub fn quote(&self, order_id: &OrderId) -> Option<FreezeQuote> {
        self.quotes.get(order_id)
    }

    /// Validate an intent and issue a freeze quote for it
    ///
    /// `mark` prices market orders; without one they cannot be quoted.
    pub async fn request_freeze(
        &self,
        intent: OrderIntent,
        mark: Option<Price>,
        now: DateTime<Utc>,
    ) -> Result<FreezeQuote, EngineError> {
        let market = self.registry.get_active(intent.market_id)?;
        if let OrderKind::Limit { price } = intent.kind {
            market.validate_price(price)?;
        }
        market.validate_size(intent.size)?;
        if intent.expires_at.is_some_and(|at| at <= now) {
            return Err(OrderError::InvalidParameters("expires_at is in the past".to_string()).into());
        }

        let price = match intent.kind {
            OrderKind::Limit { price } => price,
            OrderKind::Market => mark.ok_or(AdmissionError::NoReferencePrice {
                market_id: intent.market_id.as_u64(),
            })?,
        };
        let collateral = required_collateral(market, intent.size, price, self.policy.collateral_decimals)?;

        if self.policy.check_free_collateral {
            if let Some(available) = self.custody.free_collateral(&intent.user_address).await? {
                if available < collateral {
                    return Err(AdmissionError::InsufficientCollateral {
                        required: collateral.to_string(),
                        available: available.to_string(),
                    }
                    .into());
                }
            }
        }

        let quote = FreezeQuote {
            order_id: OrderId::new(),
            payload: self.policy.payload(&intent, collateral),
            intent,
            required_collateral: collateral,
            message: SIGN_MESSAGE.to_string(),
            created_at: now,
            expires_at: now + self.policy.ttl,
        };
        self.journal(&StoreRecord::QuoteIssued(quote.clone()), now)?;
        self.quotes.insert(quote.clone());

        info!(
            order_id = %quote.order_id,
            user = %quote.intent.user_address,
            market_id = %quote.intent.market_id,
            collateral = quote.required_collateral,
            "Freeze quote issued"
        );
        Ok(quote)
    }

    /// Verify the signed lock transaction for a pending quote
    ///
    /// Returns the quote once custody accepted it; the caller admits the
    /// intent and then calls [`FreezeCoordinator::close`]. A quote can be
    /// confirmed at most once and a transaction can back only one quote.
    pub async fn confirm(
        &self,
        order_id: &OrderId,
        tx_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<FreezeQuote, EngineError> {
        let tx_hash = tx_hash.trim();
        if tx_hash.is_empty() {
            return Err(OrderError::InsufficientSpecification("signed_transaction_hash".to_string()).into());
        }
        let Some(quote) = self.quotes.take(order_id) else {
            if self.quotes.expired_at(order_id).is_some() {
                return Err(AdmissionError::FreezeExpired {
                    order_id: order_id.to_string(),
                }
                .into());
            }
            return Err(AdmissionError::QuoteNotFound {
                order_id: order_id.to_string(),
            }
            .into());
        };

        if quote.is_expired_at(now) {
            self.close(&quote, FreezeState::Expired, None, now);
            return Err(expired(&quote));
        }
        if let Err(holder) = self.quotes.claim_transaction(tx_hash, quote.order_id, quote.created_at) {
            warn!(order_id = %quote.order_id, %tx_hash, %holder, "Freeze transaction reused");
            self.quotes.insert(quote);
            return Err(AdmissionError::FreezeNotConfirmed {
                order_id: order_id.to_string(),
                reason: format!("transaction already confirmed order {}", holder),
            }
            .into());
        }

        match self.custody.verify_freeze(&quote, tx_hash).await {
            Ok(()) => {
                debug!(order_id = %quote.order_id, %tx_hash, "Freeze verified");
                Ok(quote)
            }
            Err(AdmissionError::CustodyUnavailable(reason)) => {
                // Nothing was learned about the transaction; the client may retry
                warn!(order_id = %quote.order_id, %reason, "Custody check unavailable");
                self.quotes.release_transaction(tx_hash, quote.order_id);
                self.quotes.insert(quote);
                Err(AdmissionError::CustodyUnavailable(reason).into())
            }
            Err(e) => {
                warn!(order_id = %quote.order_id, error = %e, "Freeze rejected");
                self.quotes.release_transaction(tx_hash, quote.order_id);
                self.close(&quote, FreezeState::Rejected, None, now);
                Err(e.into())
            }
        }
    }

    /// Fail a verified quote whose validity ran out during verification
    ///
    /// The transaction stays spent: custody already accepted it.
    pub fn check_still_valid(&self, quote: &FreezeQuote, tx_hash: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        if quote.is_expired_at(now) {
            self.close(quote, FreezeState::Expired, Some(tx_hash), now);
            return Err(expired(quote));
        }
        Ok(())
    }

    /// Record the terminal state of a quote taken out of the table
    ///
    /// `tx_hash` is the lock transaction custody accepted, if any; it is
    /// journaled so the one-transaction-per-order rule survives a restart.
    pub fn close(&self, quote: &FreezeQuote, state: FreezeState, tx_hash: Option<&str>, now: DateTime<Utc>) {
        if state == FreezeState::Expired {
            self.quotes.mark_expired(quote.order_id, quote.expires_at);
        }
        let record = StoreRecord::QuoteClosed {
            order_id: quote.order_id,
            state,
            tx_hash: tx_hash.map(|h| h.trim().to_ascii_lowercase()),
        };
        if let Err(e) = self.journal(&record, now) {
            // Recovery drops the quote anyway once its expiry has passed
            warn!(order_id = %quote.order_id, %state, error = %e, "Failed to journal quote close");
        }
    }

    /// Drop quotes whose validity ended and forget what is past retention
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired = self.quotes.sweep(now);
        for quote in &expired {
            self.close(quote, FreezeState::Expired, None, now);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired freeze quotes");
        }
        let pruned = self.quotes.prune(now, self.policy.retention);
        if pruned > 0 {
            debug!(pruned, "Forgot retained quote tombstones and transactions");
        }
        expired.len()
    }

    /// Rebuild the quote table from the journal
    ///
    /// Open quotes come back, quotes that lapsed while down are closed as
    /// expired, and earlier expiries and spent transactions are reloaded
    /// within the retention window. Returns the number of open quotes.
    pub fn restore(&self, recovered: &RecoveredState, now: DateTime<Utc>) -> usize {
        let live = recovered.live_quotes(now);
        let restored = live.len();
        for quote in live {
            self.quotes.insert(quote);
        }
        for (order_id, expires_at) in &recovered.expired_quotes {
            self.quotes.mark_expired(*order_id, *expires_at);
        }
        for spent in recovered.spent_transactions.values() {
            // Journaled hashes never collide, each close names its own order
            let _ = self.quotes.claim_transaction(&spent.tx_hash, spent.order_id, spent.quoted_at);
        }
        let lapsed = recovered.lapsed_quotes(now);
        for quote in &lapsed {
            self.close(quote, FreezeState::Expired, None, now);
        }
        self.quotes.prune(now, self.policy.retention);

        info!(
            open = restored,
            lapsed = lapsed.len(),
            spent_transactions = self.quotes.spent_len(),
            "Freeze quotes restored"
        );
        restored
    }

    fn journal(&self, record: &StoreRecord, now: DateTime<Utc>) -> Result<(), EngineError> {
        if let Some(store) = &self.store {
            store.append(record, now).map_err(|e| EngineError::Storage {
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn expired(quote: &FreezeQuote) -> EngineError {
    AdmissionError::FreezeExpired {
        order_id: quote.order_id.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use persistence::JournalConfig;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use types::ids::{MarketId, UserAddress};
    use types::market::MarketConfig;
    use types::numeric::Quantity;
    use types::order::{OrderFlags, Side, TimeInForce};

    #[derive(Default)]
    struct MockCustody {
        outcomes: Mutex<Vec<Result<(), AdmissionError>>>,
        free: Option<u64>,
    }

    #[async_trait]
    impl CustodyVerifier for MockCustody {
        async fn verify_freeze(&self, _quote: &FreezeQuote, _tx_hash: &str) -> Result<(), AdmissionError> {
            self.outcomes.lock().unwrap().pop().unwrap_or(Ok(()))
        }

        async fn free_collateral(&self, _user: &UserAddress) -> Result<Option<u64>, AdmissionError> {
            Ok(self.free)
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn policy() -> QuotePolicy {
        QuotePolicy {
            ttl: Duration::seconds(30),
            collateral_decimals: 6,
            coin_type: "0x1::aptos_coin::AptosCoin".to_string(),
            contract_address: "0xc0de".to_string(),
            gas_limit: 100_000,
            gas_unit_price: 100,
            check_free_collateral: true,
            retention: Duration::hours(1),
        }
    }

    fn coordinator(custody: MockCustody) -> FreezeCoordinator {
        coordinator_on(custody, None)
    }

    fn coordinator_on(custody: MockCustody, store: Option<Arc<EngineStore>>) -> FreezeCoordinator {
        let registry = Arc::new(MarketRegistry::new(MarketConfig::defaults()).unwrap());
        FreezeCoordinator::new(registry, Arc::new(custody), store, policy())
    }

    fn open_store(dir: &TempDir) -> (Arc<EngineStore>, RecoveredState) {
        let (store, recovered) = EngineStore::open(JournalConfig::new(dir.path())).unwrap();
        (Arc::new(store), recovered)
    }

    fn intent(kind: OrderKind, size: &str) -> OrderIntent {
        OrderIntent {
            user_address: UserAddress::try_new("0xa11ce").unwrap(),
            market_id: MarketId::new(1),
            side: Side::Buy,
            kind,
            size: Quantity::from_str(size).unwrap(),
            time_in_force: TimeInForce::GTC,
            flags: OrderFlags::default(),
            expires_at: None,
        }
    }

    fn limit(price: u64) -> OrderKind {
        OrderKind::Limit { price: Price::from_u64(price) }
    }

    #[tokio::test]
    async fn test_quote_carries_lock_payload() {
        let c = coordinator(MockCustody::default());
        let quote = c.request_freeze(intent(limit(40_000), "0.5"), None, t0()).await.unwrap();

        assert_eq!(quote.required_collateral, 1_000_000_000);
        assert_eq!(quote.payload.function, "0xc0de::vault::freeze_funds");
        assert_eq!(quote.payload.type_arguments, vec!["0x1::aptos_coin::AptosCoin"]);
        assert_eq!(quote.payload.arguments, vec!["1000000000", "1"]);
        assert_eq!(quote.expires_at, t0() + Duration::seconds(30));
        assert_eq!(c.pending(), 1);
    }

    #[tokio::test]
    async fn test_request_validation() {
        let c = coordinator(MockCustody::default());

        let mut unknown = intent(limit(100), "1");
        unknown.market_id = MarketId::new(99);
        let err = c.request_freeze(unknown, None, t0()).await.unwrap_err();
        assert_eq!(err.reason_code(), "MARKET_UNKNOWN");

        let err = c.request_freeze(intent(OrderKind::Limit { price: Price::from_str("100.05").unwrap() }, "1"), None, t0()).await.unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_TICK");

        let err = c.request_freeze(intent(OrderKind::Market, "1"), None, t0()).await.unwrap_err();
        assert_eq!(err.reason_code(), "NO_REFERENCE_PRICE");

        let mut stale = intent(limit(100), "1");
        stale.expires_at = Some(t0());
        let err = c.request_freeze(stale, None, t0()).await.unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_PARAMETERS");
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test]
    async fn test_market_order_uses_mark_and_free_collateral() {
        let custody = MockCustody {
            free: Some(1_000),
            ..MockCustody::default()
        };
        let c = coordinator(custody);
        let err = c
            .request_freeze(intent(OrderKind::Market, "1"), Some(Price::from_u64(100)), t0())
            .await
            .unwrap_err();
        // 1 × 100 × 5% = 5 USDC = 5_000_000 units > 1_000
        assert_eq!(err.reason_code(), "INSUFFICIENT_COLLATERAL");
    }

    #[tokio::test]
    async fn test_confirm_once() {
        let c = coordinator(MockCustody::default());
        let quote = c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();

        let confirmed = c.confirm(&quote.order_id, "0xfeed", t0() + Duration::seconds(5)).await.unwrap();
        assert_eq!(confirmed.order_id, quote.order_id);

        let err = c.confirm(&quote.order_id, "0xfeed", t0() + Duration::seconds(6)).await.unwrap_err();
        assert_eq!(err.reason_code(), "QUOTE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_late_confirm_is_expired() {
        let c = coordinator(MockCustody::default());
        let first = c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();

        let err = c.confirm(&first.order_id, "0xfeed", t0() + Duration::seconds(30)).await.unwrap_err();
        assert_eq!(err.reason_code(), "FREEZE_EXPIRED");
        assert_eq!(c.pending(), 0);

        let quote = c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();
        let verified = c.confirm(&quote.order_id, "0xbeef", t0() + Duration::seconds(29)).await.unwrap();
        let err = c.check_still_valid(&verified, "0xbeef", t0() + Duration::seconds(31)).unwrap_err();
        assert_eq!(err.reason_code(), "FREEZE_EXPIRED");

        // Every later confirm of either quote keeps reading as expired
        for id in [&first.order_id, &verified.order_id] {
            let err = c.confirm(id, "0xcafe", t0() + Duration::seconds(40)).await.unwrap_err();
            assert_eq!(err.reason_code(), "FREEZE_EXPIRED");
        }
    }

    #[tokio::test]
    async fn test_confirm_after_sweep_is_expired() {
        let c = coordinator(MockCustody::default());
        let quote = c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();
        assert_eq!(c.sweep(t0() + Duration::seconds(31)), 1);

        for late in [40, 41] {
            let err = c
                .confirm(&quote.order_id, "0xfeed", t0() + Duration::seconds(late))
                .await
                .unwrap_err();
            assert_eq!(err.reason_code(), "FREEZE_EXPIRED");
        }

        // Past retention the quote is simply unknown
        c.sweep(t0() + Duration::seconds(30) + Duration::hours(1));
        let err = c
            .confirm(&quote.order_id, "0xfeed", t0() + Duration::hours(2))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "QUOTE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_rejected_and_unavailable_verification() {
        let custody = MockCustody {
            outcomes: Mutex::new(vec![
                Err(AdmissionError::FreezeNotConfirmed {
                    order_id: "x".to_string(),
                    reason: "transaction failed".to_string(),
                }),
                Err(AdmissionError::CustodyUnavailable("node down".to_string())),
            ]),
            free: None,
        };
        let c = coordinator(custody);
        let quote = c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();
        let at = t0() + Duration::seconds(1);

        // Outcomes pop from the back: unavailable first
        let err = c.confirm(&quote.order_id, "0xfeed", at).await.unwrap_err();
        assert_eq!(err.reason_code(), "CUSTODY_UNAVAILABLE");
        assert_eq!(c.pending(), 1);

        let err = c.confirm(&quote.order_id, "0xfeed", at).await.unwrap_err();
        assert_eq!(err.reason_code(), "FREEZE_NOT_CONFIRMED");
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test]
    async fn test_transaction_backs_one_quote() {
        let c = coordinator(MockCustody::default());
        let first = c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();
        let second = c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();

        c.confirm(&first.order_id, "0xfeed", t0()).await.unwrap();
        let err = c.confirm(&second.order_id, "0xFEED", t0()).await.unwrap_err();
        assert_eq!(err.reason_code(), "FREEZE_NOT_CONFIRMED");
        // The second quote is still open for a proper transaction
        assert!(c.quote(&second.order_id).is_some());
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_quotes() {
        let c = coordinator(MockCustody::default());
        c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();
        assert_eq!(c.sweep(t0() + Duration::seconds(10)), 0);
        assert_eq!(c.pending(), 1);
        assert_eq!(c.sweep(t0() + Duration::seconds(30)), 1);
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test]
    async fn test_spent_transaction_survives_restart() {
        let dir = TempDir::new().unwrap();
        let (first, second) = {
            let (store, _) = open_store(&dir);
            let c = coordinator_on(MockCustody::default(), Some(store));
            // Same size and price, so the lock payloads are identical
            let first = c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();
            let second = c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();
            assert_eq!(first.payload.arguments, second.payload.arguments);

            let verified = c.confirm(&first.order_id, "0xFEED", t0() + Duration::seconds(1)).await.unwrap();
            c.close(&verified, FreezeState::Admitted, Some("0xFEED"), t0() + Duration::seconds(1));
            (first, second)
        };

        let (store, recovered) = open_store(&dir);
        let c = coordinator_on(MockCustody::default(), Some(store));
        assert_eq!(c.restore(&recovered, t0() + Duration::seconds(5)), 1);
        assert!(c.quote(&second.order_id).is_some());

        let err = c
            .confirm(&second.order_id, "0xfeed", t0() + Duration::seconds(6))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "FREEZE_NOT_CONFIRMED");
        assert!(c.quote(&second.order_id).is_some());

        let err = c.confirm(&first.order_id, "0xbeef", t0() + Duration::seconds(6)).await.unwrap_err();
        assert_eq!(err.reason_code(), "QUOTE_NOT_FOUND");
        c.confirm(&second.order_id, "0xbeef", t0() + Duration::seconds(7)).await.unwrap();
    }

    #[tokio::test]
    async fn test_expiry_survives_restart() {
        let dir = TempDir::new().unwrap();
        let (swept, lapsed) = {
            let (store, _) = open_store(&dir);
            let c = coordinator_on(MockCustody::default(), Some(store));
            let swept = c.request_freeze(intent(limit(100), "1"), None, t0()).await.unwrap();
            let lapsed = c
                .request_freeze(intent(limit(100), "2"), None, t0() + Duration::seconds(20))
                .await
                .unwrap();
            c.sweep(t0() + Duration::seconds(31));
            (swept, lapsed)
        };

        // The second quote runs out while the process is down
        let (store, recovered) = open_store(&dir);
        let c = coordinator_on(MockCustody::default(), Some(store));
        assert_eq!(c.restore(&recovered, t0() + Duration::seconds(60)), 0);

        for quote in [&swept, &lapsed] {
            let err = c
                .confirm(&quote.order_id, "0xfeed", t0() + Duration::seconds(61))
                .await
                .unwrap_err();
            assert_eq!(err.reason_code(), "FREEZE_EXPIRED");
        }
    }
}
