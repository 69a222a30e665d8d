use async_trait::async_trait;

use crate::models::coordinate::Coordinate;
use crate::route::{Route, RouteError};

/// Turn-by-turn routing backend.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn fetch_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<Route, RouteError>;
}

/// Road-network snapping backend. Returns the input unchanged when no road is
/// confidently identified.
#[async_trait]
pub trait MapMatcher: Send + Sync {
    async fn match_fix(&self, raw: Coordinate) -> Coordinate;
}

/// Provider for deployments without a routing backend; every session falls
/// back to the straight-line route.
#[derive(Debug, Default, Clone)]
pub struct OfflineRouteProvider;

#[async_trait]
impl RouteProvider for OfflineRouteProvider {
    async fn fetch_route(
        &self,
        _origin: Coordinate,
        _destination: Coordinate,
    ) -> Result<Route, RouteError> {
        Err(RouteError::Unavailable(
            "no routing backend configured".to_string(),
        ))
    }
}

#[derive(Debug, Default, Clone)]
pub struct PassthroughMapMatcher;

#[async_trait]
impl MapMatcher for PassthroughMapMatcher {
    async fn match_fix(&self, raw: Coordinate) -> Coordinate {
        raw
    }
}
