pub mod heading;
pub mod live;
pub mod simulation;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::coordinate::Coordinate;
use crate::models::position::PositionUpdate;
use crate::observability::metrics::Metrics;

/// Publishes one session's positions onto the shared update channel.
#[derive(Clone)]
pub struct PositionSink {
    order_id: Uuid,
    mode: &'static str,
    tx: broadcast::Sender<PositionUpdate>,
    pub metrics: Metrics,
}

impl PositionSink {
    pub fn new(
        order_id: Uuid,
        mode: &'static str,
        tx: broadcast::Sender<PositionUpdate>,
        metrics: Metrics,
    ) -> Self {
        Self {
            order_id,
            mode,
            tx,
            metrics,
        }
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn publish(&self, position: Coordinate, segment_index: usize, recorded_at: DateTime<Utc>) {
        let update = PositionUpdate {
            order_id: self.order_id,
            position,
            segment_index,
            recorded_at,
        };

        self.metrics
            .position_updates_total
            .with_label_values(&[self.mode])
            .inc();
        // no subscribers is fine; nobody is watching this order yet
        let _ = self.tx.send(update);
    }
}
