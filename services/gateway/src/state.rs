use crate::config::EngineSettings;
use crate::coordinator::{CustodyVerifier, FreezeCoordinator, QuotePolicy};
use crate::history::History;
use crate::markets::{Admission, Markets};
use chrono::{DateTime, Utc};
use market_data::StreamPublisher;
use matching_engine::MarketRegistry;
use persistence::{EngineStore, RecoveredState};
use settlement::{PriceCache, ReferencePriceSource, SettlementHandle, SettlementMetrics};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use types::errors::EngineError;
use types::freeze::{FreezeQuote, FreezeState};
use types::ids::{MarketId, OrderId};
use types::numeric::Price;
use types::order::{Order, OrderIntent, Side};

/// External collaborators and shared services wired in by `main`
pub struct Collaborators {
    pub custody: Arc<dyn CustodyVerifier>,
    pub prices: Arc<dyn ReferencePriceSource>,
    /// Set when reference prices come from our own fills
    pub price_cache: Option<Arc<PriceCache>>,
    pub store: Option<Arc<EngineStore>>,
    pub settlement: Option<SettlementHandle>,
    pub settlement_metrics: Option<Arc<SettlementMetrics>>,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub direct_orders_enabled: bool,
    pub book_depth: usize,
    pub health_probe: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub markets: Arc<Markets>,
    pub coordinator: Arc<FreezeCoordinator>,
    pub publisher: Arc<StreamPublisher>,
    pub prices: Arc<dyn ReferencePriceSource>,
    pub store: Option<Arc<EngineStore>>,
    pub settlement: Option<Arc<SettlementMetrics>>,
    pub options: ServiceOptions,
}

impl AppState {
    pub fn new(settings: &EngineSettings, registry: Arc<MarketRegistry>, parts: Collaborators) -> Self {
        let publisher = Arc::new(StreamPublisher::new(settings.server.stream_buffer));
        let mut markets = Markets::new(
            registry.clone(),
            Arc::new(History::new()),
            publisher.clone(),
            settings.server.trade_history,
        );
        if let Some(store) = &parts.store {
            markets = markets.with_store(store.clone());
        }
        if let Some(handle) = parts.settlement {
            markets = markets.with_settlement(handle);
        }
        if let Some(cache) = parts.price_cache {
            markets = markets.with_price_cache(cache);
        }

        let policy = QuotePolicy {
            ttl: settings.quote_ttl(),
            collateral_decimals: settings.freeze.collateral_decimals,
            coin_type: settings.freeze.collateral_coin_type.clone(),
            contract_address: settings.chain.contract_address.clone(),
            gas_limit: settings.freeze.gas_limit,
            gas_unit_price: settings.freeze.gas_unit_price,
            check_free_collateral: settings.freeze.check_free_collateral,
            retention: settings.quote_retention(),
        };
        let coordinator = FreezeCoordinator::new(registry, parts.custody, parts.store.clone(), policy);

        Self {
            markets: Arc::new(markets),
            coordinator: Arc::new(coordinator),
            publisher,
            prices: parts.prices,
            store: parts.store,
            settlement: parts.settlement_metrics,
            options: ServiceOptions {
                direct_orders_enabled: settings.server.direct_orders_enabled,
                book_depth: settings.server.book_depth,
                health_probe: Duration::from_millis(settings.server.health_probe_ms),
            },
        }
    }

    /// Bring books, history and open quotes back from the journal
    pub async fn restore(&self, recovered: &RecoveredState, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.markets.restore(recovered).await?;

        let quotes = self.coordinator.restore(recovered, now);
        info!(
            orders = recovered.orders.len(),
            trades = recovered.trades.len(),
            quotes,
            corrupted = recovered.corrupted_entries,
            "State restored from journal"
        );
        Ok(())
    }

    /// Reference price for margining a market order
    pub async fn mark_price(&self, market_id: MarketId, side: Side) -> Result<Option<Price>, EngineError> {
        match self.prices.reference_price(market_id).await {
            Ok(reference) => Ok(Some(reference.price)),
            Err(e) => {
                debug!(%market_id, error = %e, "No oracle price, falling back to book");
                Ok(self.markets.fallback_mark(market_id, side).await?)
            }
        }
    }

    pub async fn request_freeze(&self, intent: OrderIntent) -> Result<FreezeQuote, EngineError> {
        let mark = if intent.kind.is_market() {
            self.mark_price(intent.market_id, intent.side).await?
        } else {
            None
        };
        self.coordinator.request_freeze(intent, mark, Utc::now()).await
    }

    /// Verify a freeze and admit its order under the market lock
    pub async fn confirm(&self, order_id: OrderId, tx_hash: &str) -> Result<Admission, EngineError> {
        let quote = self.coordinator.confirm(&order_id, tx_hash, Utc::now()).await?;
        // Verification may have outlived the quote
        let now = Utc::now();
        self.coordinator.check_still_valid(&quote, tx_hash, now)?;

        let order = Order::from_intent(quote.order_id, quote.intent.clone(), now);
        match self.markets.submit(order, now).await {
            Ok(admission) => {
                self.coordinator.close(&quote, FreezeState::Admitted, Some(tx_hash), now);
                Ok(admission)
            }
            Err(e @ EngineError::Storage { .. }) => {
                // Matched in memory; only the journal write failed
                self.coordinator.close(&quote, FreezeState::Admitted, Some(tx_hash), now);
                Err(e)
            }
            Err(e) => {
                self.coordinator.close(&quote, FreezeState::Rejected, Some(tx_hash), now);
                Err(e)
            }
        }
    }
}
