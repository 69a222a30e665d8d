use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::coordinate::Coordinate;

/// Name given to couriers assigned without a roster entry.
pub const DEFAULT_COURIER_NAME: &str = "Delivery Partner";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub enum VehicleType {
    #[default]
    Bike,
    Scooter,
    Car,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub vehicle: VehicleType,
    pub position: Option<Coordinate>,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn new(name: impl Into<String>, vehicle: VehicleType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            vehicle,
            position: None,
            updated_at: Utc::now(),
        }
    }

    pub fn move_to(&mut self, position: Coordinate) {
        self.position = Some(position);
        self.updated_at = Utc::now();
    }
}
