use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::OrderTrackingState;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("cannot move order from {from:?} to {to:?}")]
    InvalidTransition {
        from: OrderTrackingState,
        to: OrderTrackingState,
    },

    #[error("cannot start tracking order {order_id}: {reason}")]
    AssignmentFailure { order_id: Uuid, reason: String },

    #[error("order store failed: {0}")]
    Store(String),
}

impl From<TrackingError> for AppError {
    fn from(err: TrackingError) -> Self {
        match err {
            TrackingError::OrderNotFound(_) => AppError::NotFound(err.to_string()),
            TrackingError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            TrackingError::AssignmentFailure { .. } => AppError::Unprocessable(err.to_string()),
            TrackingError::Store(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
