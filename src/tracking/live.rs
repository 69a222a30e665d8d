//! Courier tracking from a stream of raw GPS fixes.

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::geo::{distance_m, interpolate, nearest_waypoint_index, snap_to_route};
use crate::models::coordinate::Coordinate;
use crate::models::courier::Courier;
use crate::models::position::GpsFix;
use crate::route::Route;
use crate::route::provider::MapMatcher;
use crate::tracking::PositionSink;

/// Fixes closer than this to the last accepted fix are treated as jitter.
pub const JITTER_THRESHOLD_M: f64 = 5.0;
/// Snapped fixes farther than this from the matched point are not trusted.
pub const UNRELIABLE_FIX_THRESHOLD_M: f64 = 200.0;
/// Distance to the next waypoint at which the current segment advances.
pub const WAYPOINT_REACHED_RADIUS_M: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixOutcome {
    /// Too close to the previous fix; nothing emitted.
    Jitter,
    /// Fix snapped onto the route and used.
    Accepted(Coordinate),
    /// Fix too far off the route; the current segment midpoint was used.
    OffRoute(Coordinate),
}

impl FixOutcome {
    pub fn position(&self) -> Option<Coordinate> {
        match self {
            FixOutcome::Jitter => None,
            FixOutcome::Accepted(position) | FixOutcome::OffRoute(position) => Some(*position),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            FixOutcome::Jitter => "jitter",
            FixOutcome::Accepted(_) => "accepted",
            FixOutcome::OffRoute(_) => "off_route",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveTracker {
    route: Route,
    index: usize,
    last_fix: Option<Coordinate>,
}

impl LiveTracker {
    pub fn new(route: Route, start: Coordinate) -> Self {
        let index = nearest_waypoint_index(&start, route.waypoints()).unwrap_or(0);
        Self {
            route,
            index,
            last_fix: None,
        }
    }

    pub fn segment_index(&self) -> usize {
        self.index
    }

    /// Decides where a fix puts the courier. `matched` is the map-matcher's
    /// road-aligned version of `raw`.
    pub fn accept(&mut self, raw: Coordinate, matched: Coordinate) -> FixOutcome {
        if let Some(last) = self.last_fix {
            if distance_m(&last, &raw) < JITTER_THRESHOLD_M {
                return FixOutcome::Jitter;
            }
        }
        self.last_fix = Some(raw);

        let waypoints = self.route.waypoints();
        let snapped = snap_to_route(&matched, waypoints);

        let outcome = if distance_m(&snapped, &matched) <= UNRELIABLE_FIX_THRESHOLD_M {
            FixOutcome::Accepted(snapped)
        } else {
            FixOutcome::OffRoute(snap_to_route(&self.segment_midpoint(), waypoints))
        };

        if let Some(position) = outcome.position() {
            self.advance_segment(&position);
        }
        outcome
    }

    fn segment_midpoint(&self) -> Coordinate {
        let waypoints = self.route.waypoints();
        match (waypoints.get(self.index), waypoints.get(self.index + 1)) {
            (Some(start), Some(end)) => interpolate(start, end, 0.5),
            (Some(only), None) => *only,
            _ => waypoints.last().copied().unwrap_or(Coordinate::new(0.0, 0.0)),
        }
    }

    fn advance_segment(&mut self, position: &Coordinate) {
        let waypoints = self.route.waypoints();
        while let Some(next) = waypoints.get(self.index + 1) {
            if distance_m(position, next) >= WAYPOINT_REACHED_RADIUS_M {
                break;
            }
            self.index += 1;
        }
    }
}

/// Consumes fixes until the stream ends, moving the courier for every fix that
/// survives jitter filtering.
pub async fn drive<S>(
    tracker: &mut LiveTracker,
    courier: &mut Courier,
    mut fixes: S,
    matcher: &dyn MapMatcher,
    sink: &PositionSink,
) where
    S: Stream<Item = GpsFix> + Unpin,
{
    while let Some(fix) = fixes.next().await {
        let matched = matcher.match_fix(fix.position).await;
        let outcome = tracker.accept(fix.position, matched);

        sink.metrics
            .gps_fixes_total
            .with_label_values(&[outcome.as_label()])
            .inc();

        if let FixOutcome::OffRoute(_) = outcome {
            debug!(
                order_id = %sink.order_id(),
                lat = fix.position.lat,
                lng = fix.position.lng,
                "gps fix far from route; holding to segment midpoint"
            );
        }

        if let Some(position) = outcome.position() {
            courier.move_to(position);
            sink.publish(position, tracker.segment_index(), fix.recorded_at);
        }
    }
}
