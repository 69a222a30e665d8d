use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::coordinate::Coordinate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub order_id: Uuid,
    pub position: Coordinate,
    pub segment_index: usize,
    pub recorded_at: DateTime<Utc>,
}

/// A raw location fix as reported by the courier's device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpsFix {
    pub position: Coordinate,
    pub recorded_at: DateTime<Utc>,
}

impl GpsFix {
    pub fn now(position: Coordinate) -> Self {
        Self {
            position,
            recorded_at: Utc::now(),
        }
    }
}
