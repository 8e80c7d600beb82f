use crate::handlers::{health, market, order, ws};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/orders", post(order::create_order))
        .route("/orders/freeze", post(order::freeze_order))
        .route("/orders/confirm", post(order::confirm_order))
        .route("/orders/{id}", post(order::cancel_order))
        .route("/orders/user/{address}", get(order::user_orders))
        .route("/orderbook/{market_id}", get(market::orderbook))
        .route("/trades/{market_id}", get(market::recent_trades))
        .route("/trades/user/{address}", get(market::user_trades))
        .route("/market/{market_id}", get(market::market_summary))
        .route("/markets", get(market::list_markets))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
