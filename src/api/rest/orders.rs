use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::coordinate::Coordinate;
use crate::models::order::{Order, OrderTrackingState, TrackingMode};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", post(update_status))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub store_location: Option<Coordinate>,
    pub customer_location: Option<Coordinate>,
    #[serde(default)]
    pub live_gps: bool,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderTrackingState,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    for location in [payload.store_location, payload.customer_location]
        .into_iter()
        .flatten()
    {
        validate_coordinate(&location)?;
    }

    let tracking_mode = if payload.live_gps {
        TrackingMode::Live
    } else {
        TrackingMode::Simulated
    };

    let order = Order::new(
        payload.store_location,
        payload.customer_location,
        tracking_mode,
    );
    let order = state.orders.place(order).await?;
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state.orders.load(id).await?;
    Ok(Json(order))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state.orders.advance(id, payload.status).await?;
    Ok(Json(order))
}

pub(crate) fn validate_coordinate(location: &Coordinate) -> Result<(), AppError> {
    let valid = location.lat.is_finite()
        && location.lng.is_finite()
        && (-90.0..=90.0).contains(&location.lat)
        && (-180.0..=180.0).contains(&location.lng);

    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "invalid coordinate ({}, {})",
            location.lat, location.lng
        )))
    }
}
