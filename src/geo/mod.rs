use crate::models::coordinate::Coordinate;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Refinement steps for the segment search. Each step keeps two thirds of the
/// interval, so 32 steps resolve a 100 km segment to well under a metre.
const SEGMENT_SEARCH_ITERATIONS: usize = 32;

pub fn distance_m(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * central_angle
}

/// Initial bearing from `a` to `b`, in degrees clockwise from north, `[0, 360)`.
pub fn bearing_deg(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let y = delta_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lng.cos();

    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if bearing >= 360.0 { 0.0 } else { bearing }
}

/// Smallest absolute difference between two bearings, in `[0, 180]`.
pub fn angular_difference_deg(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    if diff > 180.0 { 360.0 - diff } else { diff }
}

/// Linear interpolation in lat/lng space. `fraction` is clamped to `[0, 1]`.
pub fn interpolate(a: &Coordinate, b: &Coordinate, fraction: f64) -> Coordinate {
    let t = fraction.clamp(0.0, 1.0);
    Coordinate {
        lat: a.lat + (b.lat - a.lat) * t,
        lng: a.lng + (b.lng - a.lng) * t,
    }
}

/// Point on the lat/lng segment `start..end` nearest to `p`.
///
/// Uses a ternary search over the segment parameter instead of a closed-form
/// projection, so the haversine metric is used directly. The refined candidate
/// is compared against both endpoints, which keeps the result no farther from
/// `p` than either of them.
pub fn closest_point_on_segment(p: &Coordinate, start: &Coordinate, end: &Coordinate) -> Coordinate {
    let at = |t: f64| interpolate(start, end, t);

    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    for _ in 0..SEGMENT_SEARCH_ITERATIONS {
        let third = (hi - lo) / 3.0;
        let m1 = lo + third;
        let m2 = hi - third;
        if distance_m(p, &at(m1)) < distance_m(p, &at(m2)) {
            hi = m2;
        } else {
            lo = m1;
        }
    }

    [at((lo + hi) / 2.0), *start, *end]
        .into_iter()
        .min_by(|a, b| distance_m(p, a).total_cmp(&distance_m(p, b)))
        .unwrap_or(*start)
}

/// Nearest point to `p` on the polyline through `waypoints`.
///
/// A single waypoint snaps to itself and an empty polyline returns `p`.
pub fn snap_to_route(p: &Coordinate, waypoints: &[Coordinate]) -> Coordinate {
    match waypoints {
        [] => *p,
        [only] => *only,
        _ => waypoints
            .windows(2)
            .map(|pair| closest_point_on_segment(p, &pair[0], &pair[1]))
            .min_by(|a, b| distance_m(p, a).total_cmp(&distance_m(p, b)))
            .unwrap_or(*p),
    }
}

/// Index of the waypoint closest to `p`, or `None` for an empty slice.
pub fn nearest_waypoint_index(p: &Coordinate, waypoints: &[Coordinate]) -> Option<usize> {
    waypoints
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| distance_m(p, a).total_cmp(&distance_m(p, b)))
        .map(|(index, _)| index)
}
