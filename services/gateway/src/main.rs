use anyhow::Context;
use chrono::Utc;
use gateway::coordinator::AptosCustody;
use gateway::{create_router, AppState, Collaborators, EngineSettings};
use matching_engine::MarketRegistry;
use persistence::EngineStore;
use settlement::{HttpPriceFeed, HttpSettlementSink, PriceCache, ReferencePriceSource, SettlementService};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = EngineSettings::load().context("Failed to load configuration")?;
    info!("Starting matching engine gateway");

    let registry = Arc::new(MarketRegistry::new(settings.markets.clone())?);
    let now = Utc::now();

    let (store, recovered) = match settings.journal_config() {
        Some(journal) => {
            let (store, recovered) = EngineStore::open(journal).context("Failed to open journal")?;
            (Some(Arc::new(store)), Some(recovered))
        }
        None => {
            warn!("Journal disabled; state will not survive a restart");
            (None, None)
        }
    };

    let (prices, price_cache): (Arc<dyn ReferencePriceSource>, Option<Arc<PriceCache>>) =
        match &settings.oracle.url {
            Some(url) => {
                let feed = HttpPriceFeed::new(url.clone(), Duration::from_millis(settings.oracle.timeout_ms))?;
                (Arc::new(feed), None)
            }
            None => {
                info!("No oracle configured, reference prices follow the last trade");
                let cache = Arc::new(PriceCache::new());
                (cache.clone(), Some(cache))
            }
        };

    let chain_timeout = Duration::from_millis(settings.chain.request_timeout_ms);
    let custody = Arc::new(AptosCustody::new(
        &settings.chain.node_url,
        settings.freeze.collateral_coin_type.clone(),
        chain_timeout,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut settlement_task = None;
    let mut settlement_handle = None;
    let mut settlement_metrics = None;
    if settings.settlement.enabled {
        let sink = Arc::new(HttpSettlementSink::new(
            settings.chain.relay_url.clone(),
            &settings.chain.contract_address,
            chain_timeout,
        )?);
        let (mut service, handle) =
            SettlementService::new(settings.settlement_config(), prices.clone(), sink, store.clone());
        if let Some(recovered) = &recovered {
            let parked = recovered.reconciliation_batches().into_iter().cloned().collect();
            service.restore(recovered.unsettled_trades(), parked, now);
        }
        settlement_metrics = Some(service.metrics());
        settlement_handle = Some(handle);

        let mut rx = shutdown_rx.clone();
        settlement_task = Some(tokio::spawn(service.run(async move {
            let _ = rx.changed().await;
        })));
    } else {
        warn!("Settlement disabled; fills stay in the journal until it is enabled");
    }

    let state = AppState::new(
        &settings,
        registry,
        Collaborators {
            custody,
            prices,
            price_cache,
            store,
            settlement: settlement_handle,
            settlement_metrics,
        },
    );
    if let Some(recovered) = &recovered {
        state.restore(recovered, now).await?;
    }

    let sweeper = {
        let state = state.clone();
        let mut rx = shutdown_rx.clone();
        let orders_every = Duration::from_millis(settings.server.expiry_sweep_ms.max(1));
        let quotes_every = Duration::from_millis(settings.freeze.sweep_interval_ms.max(1));
        tokio::spawn(async move {
            let mut orders_tick = tokio::time::interval(orders_every);
            let mut quotes_tick = tokio::time::interval(quotes_every);
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    _ = orders_tick.tick() => {
                        state.markets.expire_due(Utc::now()).await;
                    }
                    _ = quotes_tick.tick() => {
                        state.coordinator.sweep(Utc::now());
                    }
                }
            }
        })
    };

    let app = create_router(state.clone());
    let addr = settings.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on {}", addr);

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received, shutting down gracefully...");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    if let Some(task) = settlement_task {
        if let Err(e) = task.await {
            error!(error = %e, "Settlement task failed");
        }
    }
    if let Some(store) = &state.store {
        store.sync().context("Failed to sync journal")?;
    }
    info!("Shutdown complete");
    Ok(())
}
