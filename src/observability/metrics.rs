use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub active_sessions: IntGauge,
    pub session_starts_total: IntCounterVec,
    pub route_fetches_total: IntCounterVec,
    pub route_fetch_attempts_total: IntCounterVec,
    pub position_updates_total: IntCounterVec,
    pub gps_fixes_total: IntCounterVec,
    pub status_transitions_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let active_sessions =
            IntGauge::new("tracking_sessions_active", "Tracking sessions currently running")
                .expect("valid tracking_sessions_active metric");

        let session_starts_total = IntCounterVec::new(
            Opts::new(
                "tracking_session_starts_total",
                "Tracking start requests by outcome",
            ),
            &["outcome"],
        )
        .expect("valid tracking_session_starts_total metric");

        let route_fetches_total = IntCounterVec::new(
            Opts::new("route_fetches_total", "Routes resolved for sessions by source"),
            &["source"],
        )
        .expect("valid route_fetches_total metric");

        let route_fetch_attempts_total = IntCounterVec::new(
            Opts::new(
                "route_fetch_attempts_total",
                "Route provider calls spent per resolved route, by source",
            ),
            &["source"],
        )
        .expect("valid route_fetch_attempts_total metric");

        let position_updates_total = IntCounterVec::new(
            Opts::new("position_updates_total", "Courier positions emitted by mode"),
            &["mode"],
        )
        .expect("valid position_updates_total metric");

        let gps_fixes_total = IntCounterVec::new(
            Opts::new("gps_fixes_total", "Live GPS fixes by outcome"),
            &["outcome"],
        )
        .expect("valid gps_fixes_total metric");

        let status_transitions_total = IntCounterVec::new(
            Opts::new("order_status_transitions_total", "Order status changes by target state"),
            &["status"],
        )
        .expect("valid order_status_transitions_total metric");

        registry
            .register(Box::new(active_sessions.clone()))
            .expect("register tracking_sessions_active");
        registry
            .register(Box::new(session_starts_total.clone()))
            .expect("register tracking_session_starts_total");
        registry
            .register(Box::new(route_fetches_total.clone()))
            .expect("register route_fetches_total");
        registry
            .register(Box::new(route_fetch_attempts_total.clone()))
            .expect("register route_fetch_attempts_total");
        registry
            .register(Box::new(position_updates_total.clone()))
            .expect("register position_updates_total");
        registry
            .register(Box::new(gps_fixes_total.clone()))
            .expect("register gps_fixes_total");
        registry
            .register(Box::new(status_transitions_total.clone()))
            .expect("register order_status_transitions_total");

        Self {
            registry,
            active_sessions,
            session_starts_total,
            route_fetches_total,
            route_fetch_attempts_total,
            position_updates_total,
            gps_fixes_total,
            status_transitions_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
