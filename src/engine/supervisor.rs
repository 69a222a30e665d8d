//! Tracking session supervisor.
//!
//! Each order that goes out for delivery gets exactly one session task. The task
//! resolves a route (retrying, then falling back to a straight line), resets the
//! courier to the store, and drives either the simulation or the live tracker
//! until it is told to stop. The supervisor owns the task handles; nothing else
//! touches a session's courier while it runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TrackingError;
use crate::models::coordinate::Coordinate;
use crate::models::courier::{Courier, DEFAULT_COURIER_NAME, VehicleType};
use crate::models::order::{Order, OrderTrackingState, TrackingMode};
use crate::models::position::{GpsFix, PositionUpdate};
use crate::observability::metrics::Metrics;
use crate::route::provider::{MapMatcher, RouteProvider};
use crate::route::retry::{RetryPolicy, fetch_route_with_retry};
use crate::store::OrderStore;
use crate::tracking::PositionSink;
use crate::tracking::live::{self, LiveTracker};
use crate::tracking::simulation::{self, SimulationTracker};

const FIX_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub tick_interval: Duration,
    /// Lower bound on the simulated delivery time.
    pub min_delivery_duration: Duration,
    pub retry: RetryPolicy,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            min_delivery_duration: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SessionPhase {
    Idle,
    FetchingRoute,
    Tracking,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum StartOutcome {
    Started,
    Restarted,
    AlreadyTracking,
}

impl StartOutcome {
    fn as_label(self) -> &'static str {
        match self {
            StartOutcome::Started => "started",
            StartOutcome::Restarted => "restarted",
            StartOutcome::AlreadyTracking => "duplicate",
        }
    }
}

/// Identifies which status transition a session was started for.
#[derive(Debug, Clone, PartialEq)]
struct SessionKey {
    status: OrderTrackingState,
    entered_at: DateTime<Utc>,
}

impl SessionKey {
    fn for_order(order: &Order) -> Self {
        Self {
            status: order.status,
            entered_at: order.status_changed_at(),
        }
    }
}

struct SessionHandle {
    key: SessionKey,
    phase: watch::Receiver<SessionPhase>,
    shutdown: oneshot::Sender<()>,
    fixes: Option<mpsc::Sender<GpsFix>>,
    task: JoinHandle<Courier>,
}

impl SessionHandle {
    fn is_active(&self) -> bool {
        !self.task.is_finished() && *self.phase.borrow() != SessionPhase::Stopped
    }
}

struct SessionContext {
    order_id: Uuid,
    store_location: Coordinate,
    customer_location: Coordinate,
    estimated_minutes: u32,
    routes: Arc<dyn RouteProvider>,
    matcher: Arc<dyn MapMatcher>,
    settings: TrackingSettings,
    sink: PositionSink,
}

pub struct TrackingSupervisor {
    sessions: DashMap<Uuid, SessionHandle>,
    routes: Arc<dyn RouteProvider>,
    matcher: Arc<dyn MapMatcher>,
    store: Arc<dyn OrderStore>,
    positions_tx: broadcast::Sender<PositionUpdate>,
    settings: TrackingSettings,
    metrics: Metrics,
}

impl TrackingSupervisor {
    pub fn new(
        routes: Arc<dyn RouteProvider>,
        matcher: Arc<dyn MapMatcher>,
        store: Arc<dyn OrderStore>,
        settings: TrackingSettings,
        metrics: Metrics,
        event_buffer_size: usize,
    ) -> Self {
        let (positions_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            sessions: DashMap::new(),
            routes,
            matcher,
            store,
            positions_tx,
            settings,
            metrics,
        }
    }

    /// Position updates from every session.
    pub fn subscribe(&self) -> broadcast::Receiver<PositionUpdate> {
        self.positions_tx.subscribe()
    }

    /// Phase of the order's running session, `Idle` when it has none.
    pub fn phase(&self, order_id: Uuid) -> SessionPhase {
        self.sessions
            .get(&order_id)
            .map(|handle| *handle.phase.borrow())
            .unwrap_or(SessionPhase::Idle)
    }

    /// Like [`phase`](Self::phase), but reports `Stopped` for a dispatched order
    /// whose session has ended.
    pub fn phase_for(&self, order: &Order) -> SessionPhase {
        match self.phase(order.id) {
            SessionPhase::Idle if order.was_dispatched() => SessionPhase::Stopped,
            phase => phase,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_active())
            .count()
    }

    /// Starts tracking `order`, or does nothing if a session for the same status
    /// transition is already running. A session for an older transition is
    /// stopped and replaced.
    pub async fn start_tracking(&self, order: &Order) -> Result<StartOutcome, TrackingError> {
        let (store_location, customer_location) = match endpoints(order) {
            Ok(endpoints) => endpoints,
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "tracking not started");
                self.metrics
                    .session_starts_total
                    .with_label_values(&["rejected"])
                    .inc();
                return Err(err);
            }
        };

        let key = SessionKey::for_order(order);
        if let Some(existing) = self.sessions.get(&order.id) {
            if existing.key == key && existing.is_active() {
                debug!(order_id = %order.id, "duplicate tracking start ignored");
                self.record_start(StartOutcome::AlreadyTracking);
                return Ok(StartOutcome::AlreadyTracking);
            }
        }

        let mut courier = order
            .courier
            .clone()
            .unwrap_or_else(|| Courier::new(DEFAULT_COURIER_NAME, VehicleType::default()));

        let prior = self.sessions.remove(&order.id);
        let restarted = prior.is_some();
        if let Some((_, handle)) = prior {
            info!(order_id = %order.id, "restarting tracking session");
            if let Some(previous) = self.finish(order.id, handle).await {
                courier = previous;
            }
        }

        let outcome = match self.sessions.entry(order.id) {
            Entry::Occupied(_) => StartOutcome::AlreadyTracking,
            Entry::Vacant(slot) => {
                slot.insert(self.spawn_session(order, courier, store_location, customer_location));
                if restarted {
                    StartOutcome::Restarted
                } else {
                    StartOutcome::Started
                }
            }
        };

        self.record_start(outcome);
        Ok(outcome)
    }

    /// Stops the order's session and returns its courier with the last known
    /// position. Unknown or already stopped orders are a no-op.
    pub async fn stop_tracking(&self, order_id: Uuid) -> Option<Courier> {
        let Some((_, handle)) = self.sessions.remove(&order_id) else {
            debug!(order_id = %order_id, "stop requested without an active session");
            return None;
        };

        self.finish(order_id, handle).await
    }

    pub async fn stop_all(&self) {
        let order_ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for order_id in order_ids {
            self.stop_tracking(order_id).await;
        }
    }

    /// Hands a raw GPS fix to the order's live session. Returns `false` when the
    /// order has no live session to take it.
    pub async fn submit_fix(&self, order_id: Uuid, fix: GpsFix) -> bool {
        let sender = self
            .sessions
            .get(&order_id)
            .and_then(|handle| handle.fixes.clone());

        match sender {
            Some(tx) => tx.send(fix).await.is_ok(),
            None => false,
        }
    }

    fn record_start(&self, outcome: StartOutcome) {
        self.metrics
            .session_starts_total
            .with_label_values(&[outcome.as_label()])
            .inc();
    }

    fn spawn_session(
        &self,
        order: &Order,
        courier: Courier,
        store_location: Coordinate,
        customer_location: Coordinate,
    ) -> SessionHandle {
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Idle);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let (fix_tx, fix_rx) = match order.tracking_mode {
            TrackingMode::Live => {
                let (tx, rx) = mpsc::channel(FIX_BUFFER_SIZE);
                (Some(tx), Some(rx))
            }
            TrackingMode::Simulated => (None, None),
        };

        let mode = match order.tracking_mode {
            TrackingMode::Live => "live",
            TrackingMode::Simulated => "simulated",
        };

        let ctx = SessionContext {
            order_id: order.id,
            store_location,
            customer_location,
            estimated_minutes: order.estimated_minutes_remaining(),
            routes: self.routes.clone(),
            matcher: self.matcher.clone(),
            settings: self.settings.clone(),
            sink: PositionSink::new(
                order.id,
                mode,
                self.positions_tx.clone(),
                self.metrics.clone(),
            ),
        };

        info!(order_id = %order.id, courier_id = %courier.id, mode, "tracking session spawned");
        self.metrics.active_sessions.inc();

        SessionHandle {
            key: SessionKey::for_order(order),
            phase: phase_rx,
            shutdown: shutdown_tx,
            fixes: fix_tx,
            task: tokio::spawn(run_session(ctx, courier, phase_tx, shutdown_rx, fix_rx)),
        }
    }

    /// Signals the task, waits for it and writes the courier back to the order.
    async fn finish(&self, order_id: Uuid, handle: SessionHandle) -> Option<Courier> {
        let SessionHandle {
            shutdown,
            fixes,
            task,
            ..
        } = handle;

        drop(fixes);
        let _ = shutdown.send(());
        self.metrics.active_sessions.dec();

        let courier = match task.await {
            Ok(courier) => courier,
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "tracking session task failed");
                return None;
            }
        };

        match self.store.load(order_id).await {
            Ok(Some(mut order)) => {
                order.courier = Some(courier.clone());
                if let Err(err) = self.store.persist(&order).await {
                    warn!(order_id = %order_id, error = %err, "failed to write back courier");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(order_id = %order_id, error = %err, "failed to load order on stop"),
        }

        info!(order_id = %order_id, courier_id = %courier.id, "tracking session stopped");
        Some(courier)
    }
}

/// Store and customer locations of a dispatchable order.
pub(crate) fn endpoints(order: &Order) -> Result<(Coordinate, Coordinate), TrackingError> {
    let store = order.store_location.ok_or_else(|| TrackingError::AssignmentFailure {
        order_id: order.id,
        reason: "store location missing".to_string(),
    })?;
    let customer = order
        .customer_location
        .ok_or_else(|| TrackingError::AssignmentFailure {
            order_id: order.id,
            reason: "customer location missing".to_string(),
        })?;
    if store == customer {
        return Err(TrackingError::AssignmentFailure {
            order_id: order.id,
            reason: "store and customer locations coincide".to_string(),
        });
    }
    Ok((store, customer))
}

async fn run_session(
    ctx: SessionContext,
    mut courier: Courier,
    phase: watch::Sender<SessionPhase>,
    mut shutdown: oneshot::Receiver<()>,
    fixes: Option<mpsc::Receiver<GpsFix>>,
) -> Courier {
    phase.send_replace(SessionPhase::FetchingRoute);

    let fetched = tokio::select! {
        fetched = fetch_route_with_retry(
            ctx.routes.as_ref(),
            ctx.store_location,
            ctx.customer_location,
            &ctx.settings.retry,
        ) => fetched,
        _ = &mut shutdown => {
            phase.send_replace(SessionPhase::Stopped);
            return courier;
        }
    };

    let fetched = match fetched {
        Ok(fetched) => fetched,
        Err(err) => {
            warn!(order_id = %ctx.order_id, error = %err, "no usable route; session ended");
            phase.send_replace(SessionPhase::Stopped);
            return courier;
        }
    };

    let source = fetched.source.as_label();
    ctx.sink
        .metrics
        .route_fetches_total
        .with_label_values(&[source])
        .inc();
    ctx.sink
        .metrics
        .route_fetch_attempts_total
        .with_label_values(&[source])
        .inc_by(u64::from(fetched.attempts));

    // the courier always departs from the store, whatever it was set to before
    courier.move_to(ctx.store_location);
    phase.send_replace(SessionPhase::Tracking);
    info!(
        order_id = %ctx.order_id,
        waypoints = fetched.route.len(),
        source,
        "tracking started"
    );

    let finished = match fixes {
        None => {
            let total = SimulationTracker::total_duration(
                ctx.estimated_minutes,
                ctx.settings.min_delivery_duration,
            );
            let mut tracker = SimulationTracker::new(fetched.route, ctx.store_location, total);
            ctx.sink
                .publish(ctx.store_location, tracker.segment_index(), Utc::now());

            tokio::select! {
                _ = simulation::drive(&mut tracker, &mut courier, ctx.settings.tick_interval, &ctx.sink) => true,
                _ = &mut shutdown => false,
            }
        }
        Some(rx) => {
            let mut tracker = LiveTracker::new(fetched.route, ctx.store_location);
            ctx.sink
                .publish(ctx.store_location, tracker.segment_index(), Utc::now());

            tokio::select! {
                _ = live::drive(
                    &mut tracker,
                    &mut courier,
                    ReceiverStream::new(rx),
                    ctx.matcher.as_ref(),
                    &ctx.sink,
                ) => true,
                _ = &mut shutdown => false,
            }
        }
    };

    if finished {
        // arrival does not end the session; delivery is confirmed separately
        let _ = shutdown.await;
    }

    phase.send_replace(SessionPhase::Stopped);
    courier
}
