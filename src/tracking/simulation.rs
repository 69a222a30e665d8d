//! Timer-driven courier movement for orders without a live location source.
//!
//! The courier walks the route waypoint by waypoint. Each segment gets an equal
//! share of the estimated delivery time, and every interpolated position is
//! snapped back onto the route so long segments never cut across terrain the
//! road does not cover.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::info;

use crate::geo::{distance_m, interpolate, nearest_waypoint_index, snap_to_route};
use crate::models::coordinate::Coordinate;
use crate::models::courier::Courier;
use crate::route::Route;
use crate::tracking::PositionSink;

/// Largest snap displacement trusted before falling back to a segment endpoint.
pub const SNAP_SANITY_THRESHOLD_M: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct SimulationTracker {
    route: Route,
    index: usize,
    segment_elapsed: Duration,
    time_per_segment: Duration,
}

impl SimulationTracker {
    /// Starts at the waypoint nearest `start` and spreads `total` evenly over
    /// the remaining segments of the route.
    pub fn new(route: Route, start: Coordinate, total: Duration) -> Self {
        let index = nearest_waypoint_index(&start, route.waypoints()).unwrap_or(0);
        let segments = route.len().saturating_sub(1).max(1) as u32;

        Self {
            route,
            index,
            segment_elapsed: Duration::ZERO,
            time_per_segment: total / segments,
        }
    }

    /// `max(eta, floor)`; the floor keeps short estimates visibly moving.
    pub fn total_duration(estimated_minutes: u32, floor: Duration) -> Duration {
        Duration::from_secs(u64::from(estimated_minutes) * 60).max(floor)
    }

    pub fn segment_index(&self) -> usize {
        self.index
    }

    pub fn time_per_segment(&self) -> Duration {
        self.time_per_segment
    }

    pub fn arrived(&self) -> bool {
        self.index + 1 >= self.route.len()
    }

    /// Moves the courier forward by `elapsed` and returns the new position.
    pub fn advance(&mut self, elapsed: Duration) -> Coordinate {
        self.segment_elapsed += elapsed;

        while !self.arrived() && self.segment_elapsed >= self.time_per_segment {
            self.segment_elapsed -= self.time_per_segment;
            self.index += 1;
        }

        if self.arrived() {
            self.segment_elapsed = Duration::ZERO;
        }

        self.position()
    }

    pub fn progress(&self) -> f64 {
        if self.arrived() || self.time_per_segment.is_zero() {
            return 1.0;
        }
        (self.segment_elapsed.as_secs_f64() / self.time_per_segment.as_secs_f64()).clamp(0.0, 1.0)
    }

    pub fn position(&self) -> Coordinate {
        let waypoints = self.route.waypoints();
        if self.arrived() {
            return waypoints[waypoints.len() - 1];
        }

        let start = waypoints[self.index];
        let end = waypoints[self.index + 1];
        let interpolated = interpolate(&start, &end, self.progress());
        let snapped = snap_to_route(&interpolated, waypoints);

        settle(&interpolated, snapped, &start, &end)
    }
}

/// Accepts the snapped point unless the snap moved it implausibly far, in which
/// case the nearer segment endpoint is used instead.
fn settle(
    interpolated: &Coordinate,
    snapped: Coordinate,
    start: &Coordinate,
    end: &Coordinate,
) -> Coordinate {
    if distance_m(interpolated, &snapped) <= SNAP_SANITY_THRESHOLD_M {
        return snapped;
    }

    if distance_m(interpolated, start) <= distance_m(interpolated, end) {
        *start
    } else {
        *end
    }
}

/// Ticks the tracker until the final waypoint is reached, moving the courier and
/// publishing every position. Returns once the courier has arrived.
pub async fn drive(
    tracker: &mut SimulationTracker,
    courier: &mut Courier,
    tick: Duration,
    sink: &PositionSink,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut last_tick = Instant::now();

    while !tracker.arrived() {
        ticker.tick().await;
        let now = Instant::now();
        let position = tracker.advance(now - last_tick);
        last_tick = now;

        courier.move_to(position);
        sink.publish(position, tracker.segment_index(), Utc::now());
    }

    info!(
        order_id = %sink.order_id(),
        courier_id = %courier.id,
        "courier reached final waypoint; holding position"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lat: f64, lng: f64) -> Coordinate {
        Coordinate::new(lat, lng)
    }

    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    fn cross_track_distance_m(p: &Coordinate, a: &Coordinate, b: &Coordinate) -> f64 {
        let d13 = distance_m(a, p) / EARTH_RADIUS_M;
        let theta13 = crate::geo::bearing_deg(a, p).to_radians();
        let theta12 = crate::geo::bearing_deg(a, b).to_radians();
        ((d13.sin() * (theta13 - theta12).sin()).asin() * EARTH_RADIUS_M).abs()
    }

    #[test]
    fn total_duration_respects_floor() {
        let floor = Duration::from_secs(300);
        assert_eq!(SimulationTracker::total_duration(15, floor), Duration::from_secs(900));
        assert_eq!(SimulationTracker::total_duration(2, floor), floor);
        assert_eq!(SimulationTracker::total_duration(0, Duration::from_secs(30)), Duration::from_secs(30));
    }

    #[test]
    fn starts_at_waypoint_nearest_courier() {
        let route = Route::new(vec![c(0.0, 0.0), c(0.0, 1.0), c(0.0, 2.0)]).unwrap();
        let tracker = SimulationTracker::new(route, c(0.01, 1.01), Duration::from_secs(10));
        assert_eq!(tracker.segment_index(), 1);
    }

    #[test]
    fn fallback_route_moves_along_great_circle_after_one_tick() {
        let origin = c(12.90, 77.60);
        let destination = c(12.92, 77.62);
        let route = Route::straight_line(origin, destination, 50).unwrap();
        let mut tracker = SimulationTracker::new(route, origin, Duration::from_secs(30));

        let position = tracker.advance(Duration::from_millis(100));

        assert_ne!(position, origin);
        assert!(distance_m(&position, &origin) > 1.0);
        assert!(cross_track_distance_m(&position, &origin, &destination) < 1.0);
    }

    #[test]
    fn reaches_middle_waypoint_at_half_time() {
        let route = Route::new(vec![c(0.0, 0.0), c(0.0, 1.0), c(0.0, 2.0)]).unwrap();
        let mut tracker = SimulationTracker::new(route, c(0.0, 0.0), Duration::from_secs(10));

        let mut position = c(0.0, 0.0);
        for _ in 0..50 {
            position = tracker.advance(Duration::from_millis(100));
        }

        assert_eq!(tracker.segment_index(), 1);
        assert!(distance_m(&position, &c(0.0, 1.0)) < 50.0);
    }

    #[test]
    fn segment_index_never_decreases() {
        let route = Route::straight_line(c(12.90, 77.60), c(12.92, 77.62), 50).unwrap();
        let mut tracker = SimulationTracker::new(route, c(12.90, 77.60), Duration::from_secs(30));

        let mut last_index = tracker.segment_index();
        for step in 0..400 {
            let elapsed = Duration::from_millis(if step % 3 == 0 { 250 } else { 40 });
            tracker.advance(elapsed);
            assert!(tracker.segment_index() >= last_index);
            last_index = tracker.segment_index();
        }
    }

    #[test]
    fn holds_final_waypoint_after_arrival() {
        let destination = c(0.0, 0.02);
        let route = Route::new(vec![c(0.0, 0.0), c(0.0, 0.01), destination]).unwrap();
        let mut tracker = SimulationTracker::new(route, c(0.0, 0.0), Duration::from_secs(2));

        tracker.advance(Duration::from_secs(5));
        assert!(tracker.arrived());
        assert_eq!(tracker.position(), destination);
        assert_eq!(tracker.advance(Duration::from_secs(1)), destination);
        assert_eq!(tracker.segment_index(), 2);
    }

    #[test]
    fn implausible_snap_falls_back_to_nearer_endpoint() {
        let start = c(0.0, 0.0);
        let end = c(0.0, 0.01);
        let interpolated = c(0.0, 0.003);

        let near_snap = c(0.0001, 0.003);
        assert_eq!(settle(&interpolated, near_snap, &start, &end), near_snap);

        let far_snap = c(0.01, 0.003);
        assert_eq!(settle(&interpolated, far_snap, &start, &end), start);

        let far_snap_late = c(0.01, 0.008);
        assert_eq!(settle(&c(0.0, 0.008), far_snap_late, &start, &end), end);
    }

    #[test]
    fn single_segment_route_arrives_at_destination() {
        let origin = c(1.0, 1.0);
        let destination = c(1.0, 1.001);
        let route = Route::straight_line(origin, destination, 1).unwrap();
        let mut tracker = SimulationTracker::new(route, origin, Duration::from_secs(10));

        tracker.advance(Duration::from_secs(5));
        assert!(!tracker.arrived());
        assert_eq!(tracker.advance(Duration::from_secs(6)), destination);
        assert!(tracker.arrived());
    }
}
