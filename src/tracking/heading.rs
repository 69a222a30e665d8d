//! Display heading for the courier marker.
//!
//! Raw bearings between consecutive positions wobble on straight roads, so the
//! displayed heading only turns once the courier has moved far enough for the
//! bearing to mean something and the change is large enough to be a real turn.

use crate::geo::{angular_difference_deg, bearing_deg, distance_m};
use crate::models::coordinate::Coordinate;

#[derive(Debug, Clone)]
pub struct HeadingConfig {
    /// Movement required before a new bearing is measured (metres).
    pub min_movement_m: f64,
    /// Bearing change required before the displayed heading rotates (degrees).
    pub turn_threshold_deg: f64,
}

impl Default for HeadingConfig {
    fn default() -> Self {
        Self {
            min_movement_m: 10.0,
            turn_threshold_deg: 20.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeadingSmoother {
    config: HeadingConfig,
    anchor: Option<Coordinate>,
    heading: Option<f64>,
}

impl Default for HeadingSmoother {
    fn default() -> Self {
        Self::new(HeadingConfig::default())
    }
}

impl HeadingSmoother {
    pub fn new(config: HeadingConfig) -> Self {
        Self {
            config,
            anchor: None,
            heading: None,
        }
    }

    pub fn heading(&self) -> Option<f64> {
        self.heading
    }

    /// Feeds the next position and returns the heading to display.
    pub fn update(&mut self, position: Coordinate) -> Option<f64> {
        let Some(anchor) = self.anchor else {
            self.anchor = Some(position);
            return self.heading;
        };

        if distance_m(&anchor, &position) < self.config.min_movement_m {
            return self.heading;
        }

        let bearing = bearing_deg(&anchor, &position);
        self.anchor = Some(position);

        match self.heading {
            None => self.heading = Some(bearing),
            Some(current)
                if angular_difference_deg(current, bearing) > self.config.turn_threshold_deg =>
            {
                self.heading = Some(bearing);
            }
            Some(_) => {}
        }

        self.heading
    }
}
