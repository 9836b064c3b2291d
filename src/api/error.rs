use crate::candles::CandleError;
use crate::index::IndexError;
use crate::ledger::LedgerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Unauthorized { .. } => ApiError::Unauthorized(e.to_string()),
            IndexError::UnknownMarket(_) => ApiError::NotFound(e.to_string()),
            IndexError::OutOfOrder { .. } | IndexError::OutOfRange { .. } => {
                ApiError::BadRequest(e.to_string())
            }
            IndexError::Overflow(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InvalidLeverage { .. }
            | LedgerError::ZeroMargin
            | LedgerError::InvalidStops(_)
            | LedgerError::NonPositiveAmount => ApiError::BadRequest(e.to_string()),
            LedgerError::NoOpenPosition(_) => ApiError::NotFound(e.to_string()),
            // the request was fine, the ledger state says no
            LedgerError::PositionAlreadyOpen(_)
            | LedgerError::NotLiquidatable(_)
            | LedgerError::StopsNotTriggered(_)
            | LedgerError::InsufficientFunds { .. } => ApiError::Conflict(e.to_string()),
            LedgerError::NoIndexPrice(_) | LedgerError::ZeroIndexPrice(_) => ApiError::Unavailable(e.to_string()),
            LedgerError::Overflow(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<CandleError> for ApiError {
    fn from(e: CandleError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
