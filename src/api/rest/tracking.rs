use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Serialize;
use uuid::Uuid;

use crate::api::rest::orders::validate_coordinate;
use crate::engine::supervisor::{SessionPhase, StartOutcome};
use crate::error::AppError;
use crate::models::coordinate::Coordinate;
use crate::models::order::OrderTrackingState;
use crate::models::position::{GpsFix, PositionUpdate};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/orders/:id/tracking",
            post(start_tracking).get(tracking_status).delete(stop_tracking),
        )
        .route("/orders/:id/fixes", post(submit_fix))
        .route("/orders/:id/position", get(last_position))
}

#[derive(Serialize)]
pub struct StartResponse {
    pub outcome: StartOutcome,
    pub phase: SessionPhase,
}

#[derive(Serialize)]
pub struct TrackingStatusResponse {
    pub phase: SessionPhase,
    pub status: OrderTrackingState,
    pub estimated_minutes_remaining: u32,
}

async fn start_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StartResponse>, AppError> {
    let outcome = state.orders.resume_tracking(id).await?;
    Ok(Json(StartResponse {
        outcome,
        phase: state.supervisor.phase(id),
    }))
}

async fn tracking_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingStatusResponse>, AppError> {
    let order = state.orders.load(id).await?;
    Ok(Json(TrackingStatusResponse {
        phase: state.supervisor.phase_for(&order),
        status: order.status,
        estimated_minutes_remaining: order.estimated_minutes_remaining(),
    }))
}

async fn stop_tracking(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> StatusCode {
    state.supervisor.stop_tracking(id).await;
    StatusCode::NO_CONTENT
}

async fn submit_fix(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(position): Json<Coordinate>,
) -> Result<StatusCode, AppError> {
    validate_coordinate(&position)?;

    if state.supervisor.submit_fix(id, GpsFix::now(position)).await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(AppError::Conflict(format!(
            "order {id} has no live tracking session"
        )))
    }
}

async fn last_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PositionUpdate>, AppError> {
    let update = state
        .store
        .load_position(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no position recorded for order {id}")))?;
    Ok(Json(update))
}
