use crate::error::AppError;
use crate::handlers::{parse_order_id, parse_user};
use crate::models::{
    CancelResponse, ConfirmRequest, FreezeResponse, OrderRequest, OrderResponse, OrdersPage,
    UserOrdersParams,
};
use crate::state::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use chrono::Utc;
use types::errors::OrderError;

/// Admit an order without a freeze; only for deployments that allow it
pub async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    if !state.options.direct_orders_enabled {
        return Err(OrderError::InvalidParameters(
            "direct submission is disabled; use /orders/freeze".to_string(),
        )
        .into());
    }
    let Json(request) = payload?;
    let intent = request.into_intent()?;

    let admission = state.markets.submit_intent(intent, Utc::now()).await?;
    Ok(Json(OrderResponse {
        order: admission.order,
        trades: admission.trades,
    }))
}

/// Phase one: quote the collateral lock for an order
pub async fn freeze_order(
    State(state): State<AppState>,
    payload: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<FreezeResponse>, AppError> {
    let Json(request) = payload?;
    let intent = request.into_intent()?;

    let quote = state.request_freeze(intent).await?;
    Ok(Json(FreezeResponse::from(quote)))
}

/// Phase two: prove the lock and admit the quoted order
pub async fn confirm_order(
    State(state): State<AppState>,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let Json(request) = payload?;

    let admission = state
        .confirm(request.order_id, &request.signed_transaction_hash)
        .await?;
    Ok(Json(OrderResponse {
        order: admission.order,
        trades: admission.trades,
    }))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let order_id = parse_order_id(&order_id)?;

    let order = state.markets.cancel(&order_id, Utc::now()).await?;
    Ok(Json(CancelResponse {
        success: true,
        order,
    }))
}

pub async fn user_orders(
    State(state): State<AppState>,
    Path(address): Path<String>,
    params: Result<Query<UserOrdersParams>, QueryRejection>,
) -> Result<Json<OrdersPage>, AppError> {
    let user = parse_user(&address)?;
    let Query(params) = params?;

    let (orders, total) = state.markets.history().orders_for(&user, &params.into());
    Ok(Json(OrdersPage { orders, total }))
}
