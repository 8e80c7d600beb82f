use crate::error::AppError;
use crate::handlers::{parse_market, parse_user};
use crate::history::TradeQuery;
use crate::models::{BookParams, TradesPage, TradesParams, UserTradesParams};
use crate::state::AppState;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use chrono::Utc;
use market_data::{MarketSummary, PublicTrade};
use matching_engine::BookSnapshot;
use tracing::debug;
use types::market::MarketConfig;

const DEFAULT_TRADES: usize = 50;
const MAX_TRADES: usize = 1000;

pub async fn orderbook(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
    params: Result<Query<BookParams>, QueryRejection>,
) -> Result<Json<BookSnapshot>, AppError> {
    let market_id = parse_market(&market_id)?;
    let Query(params) = params?;
    let depth = params
        .depth
        .unwrap_or(state.options.book_depth)
        .min(state.options.book_depth);

    let snapshot = state.markets.snapshot(market_id, depth).await?;
    debug!(%market_id, bids = snapshot.bids.len(), asks = snapshot.asks.len(), "Served order book");
    Ok(Json(snapshot))
}

pub async fn recent_trades(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
    params: Result<Query<TradesParams>, QueryRejection>,
) -> Result<Json<Vec<PublicTrade>>, AppError> {
    let market_id = parse_market(&market_id)?;
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(DEFAULT_TRADES).min(MAX_TRADES);

    Ok(Json(state.markets.recent_trades(market_id, limit)?))
}

pub async fn market_summary(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
) -> Result<Json<MarketSummary>, AppError> {
    let market_id = parse_market(&market_id)?;
    Ok(Json(state.markets.summary(market_id, Utc::now())?))
}

pub async fn list_markets(State(state): State<AppState>) -> Json<Vec<MarketConfig>> {
    Json(state.markets.registry().list().cloned().collect())
}

pub async fn user_trades(
    State(state): State<AppState>,
    Path(address): Path<String>,
    params: Result<Query<UserTradesParams>, QueryRejection>,
) -> Result<Json<TradesPage>, AppError> {
    let user = parse_user(&address)?;
    let Query(params) = params?;
    let query: TradeQuery = params.try_into()?;

    let (trades, total) = state.markets.history().trades_for(&user, &query);
    Ok(Json(TradesPage { trades, total }))
}
