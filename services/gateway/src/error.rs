use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use types::errors::{AdmissionError, EngineError, OrderError};

/// Central error type for the HTTP surface
///
/// Engine errors keep their reason code as the `error` field of the body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<OrderError> for AppError {
    fn from(e: OrderError) -> Self {
        AppError::Engine(e.into())
    }
}

impl From<AdmissionError> for AppError {
    fn from(e: AdmissionError) -> Self {
        AppError::Engine(e.into())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Engine(OrderError::InvalidParameters(rejection.body_text()).into())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Engine(OrderError::InvalidParameters(rejection.body_text()).into())
    }
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "MARKET_UNKNOWN" | "ORDER_NOT_FOUND" | "QUOTE_NOT_FOUND" => StatusCode::NOT_FOUND,
        "NOT_CANCELLABLE" => StatusCode::CONFLICT,
        "FREEZE_EXPIRED" => StatusCode::GONE,
        "INSUFFICIENT_COLLATERAL" | "FREEZE_NOT_CONFIRMED" => StatusCode::UNPROCESSABLE_ENTITY,
        "MARKET_HALTED" | "CUSTODY_UNAVAILABLE" | "NO_REFERENCE_PRICE" => StatusCode::SERVICE_UNAVAILABLE,
        "INVARIANT_VIOLATION" | "STORAGE_ERROR" | "INVALID_STATE_TRANSITION" | "OVERFILL" => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, code) = match self {
            AppError::Engine(e) => {
                let code = e.reason_code();
                let status = status_for(code);
                if status.is_server_error() {
                    error!(code, error = %e, "Request failed");
                }
                (status, e.to_string(), code)
            }
        };

        let body = Json(json!({
            "error": code,
            "message": error_message
        }));

        (status, body).into_response()
    }
}
