pub mod provider;
pub mod retry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::interpolate;
use crate::models::coordinate::Coordinate;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("routing service unavailable: {0}")]
    Unavailable(String),

    #[error("route has {0} usable waypoints, need at least 2")]
    TooShort(usize),
}

/// Where a session's route came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RouteSource {
    Provider,
    Fallback,
}

impl RouteSource {
    pub fn as_label(self) -> &'static str {
        match self {
            RouteSource::Provider => "provider",
            RouteSource::Fallback => "fallback",
        }
    }
}

/// Ordered road-constrained polyline from an origin to a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    waypoints: Vec<Coordinate>,
}

impl Route {
    /// Builds a usable route, dropping consecutive duplicate waypoints.
    pub fn new(waypoints: Vec<Coordinate>) -> Result<Self, RouteError> {
        let mut deduped: Vec<Coordinate> = Vec::with_capacity(waypoints.len());
        for point in waypoints {
            if deduped.last() != Some(&point) {
                deduped.push(point);
            }
        }

        if deduped.len() < 2 {
            return Err(RouteError::TooShort(deduped.len()));
        }

        Ok(Self { waypoints: deduped })
    }

    /// Evenly spaced straight line with `segments + 1` points.
    ///
    /// Used when no real route is available. The line ignores the road network.
    /// Coincident endpoints collapse to a single point and are rejected.
    pub fn straight_line(
        origin: Coordinate,
        destination: Coordinate,
        segments: usize,
    ) -> Result<Self, RouteError> {
        let segments = segments.max(1);
        let waypoints = (0..=segments)
            .map(|step| match step {
                0 => origin,
                s if s == segments => destination,
                s => interpolate(&origin, &destination, s as f64 / segments as f64),
            })
            .collect();

        Self::new(waypoints)
    }

    pub fn waypoints(&self) -> &[Coordinate] {
        &self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn origin(&self) -> Option<&Coordinate> {
        self.waypoints.first()
    }

    pub fn destination(&self) -> Option<&Coordinate> {
        self.waypoints.last()
    }
}
