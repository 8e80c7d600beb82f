use crate::markets::MarketHealth;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use settlement::SettlementStats;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct StorageHealth {
    pub enabled: bool,
    pub writable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// "healthy" or "degraded"
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub service: &'static str,
    pub markets: Vec<MarketHealth>,
    pub storage: StorageHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementStats>,
    pub pending_quotes: usize,
    pub stream_sequence: u64,
    pub subscribers: usize,
}

/// Liveness from the market workers and the journal; 503 when degraded
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let markets = state.markets.probe(state.options.health_probe).await;

    let storage = match &state.store {
        None => StorageHealth {
            enabled: false,
            writable: true,
            error: None,
        },
        Some(store) => match store.health_check() {
            Ok(()) => StorageHealth {
                enabled: true,
                writable: true,
                error: None,
            },
            Err(e) => StorageHealth {
                enabled: true,
                writable: false,
                error: Some(e.to_string()),
            },
        },
    };

    let healthy = storage.writable && markets.iter().all(MarketHealth::is_healthy);
    if !healthy {
        warn!(storage_writable = storage.writable, "Health check degraded");
    }

    let report = HealthReport {
        status: if healthy { "healthy" } else { "degraded" },
        timestamp: Utc::now(),
        service: "perp-matching-engine",
        markets,
        storage,
        settlement: state.settlement.as_ref().map(|m| m.snapshot()),
        pending_quotes: state.coordinator.pending(),
        stream_sequence: state.publisher.last_sequence(),
        subscribers: state.publisher.subscriber_count(),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
