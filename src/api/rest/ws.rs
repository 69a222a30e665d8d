use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures::SinkExt;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::status::StatusEvent;
use crate::models::coordinate::Coordinate;
use crate::models::position::PositionUpdate;
use crate::state::AppState;
use crate::tracking::heading::HeadingSmoother;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub order_id: Option<Uuid>,
}

/// Position update as shown on the map, with a jitter-free marker heading.
#[derive(Debug, Serialize)]
pub struct DisplayUpdate {
    pub order_id: Uuid,
    pub position: Coordinate,
    pub segment_index: usize,
    pub recorded_at: DateTime<Utc>,
    pub heading: Option<f64>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<FeedQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.order_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, order_filter: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.supervisor.subscribe();
    let mut status_rx = state.orders.subscribe();

    info!(order_id = ?order_filter, "websocket client connected");

    let mut send_task = tokio::spawn(async move {
        let mut smoothers: HashMap<Uuid, HeadingSmoother> = HashMap::new();

        loop {
            let received = tokio::select! {
                received = rx.recv() => received,
                event = status_rx.recv() => {
                    match event {
                        Ok(event) => forget_finished(&mut smoothers, &event),
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    }
                    continue;
                }
            };

            let update = match received {
                Ok(update) => update,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client lagging; dropped position updates");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if order_filter.is_some_and(|id| id != update.order_id) {
                continue;
            }

            let display = to_display(&update, smoothers.entry(update.order_id).or_default());
            let json = match serde_json::to_string(&display) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize position for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("websocket client disconnected");
}

/// Drops the heading state of an order that will publish no more positions.
fn forget_finished(smoothers: &mut HashMap<Uuid, HeadingSmoother>, event: &StatusEvent) {
    if event.status.is_terminal() {
        smoothers.remove(&event.order_id);
    }
}

fn to_display(update: &PositionUpdate, smoother: &mut HeadingSmoother) -> DisplayUpdate {
    DisplayUpdate {
        order_id: update.order_id,
        position: update.position,
        segment_index: update.segment_index,
        recorded_at: update.recorded_at,
        heading: smoother.update(update.position),
    }
}
