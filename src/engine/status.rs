use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::supervisor::{StartOutcome, TrackingSupervisor, endpoints};
use crate::error::TrackingError;
use crate::models::courier::{Courier, DEFAULT_COURIER_NAME, VehicleType};
use crate::models::order::{Order, OrderTrackingState};
use crate::observability::metrics::Metrics;
use crate::store::OrderStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub order_id: Uuid,
    pub status: OrderTrackingState,
    pub estimated_minutes_remaining: u32,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            estimated_minutes_remaining: order.estimated_minutes_remaining(),
            at: order.status_changed_at(),
        }
    }
}

/// Moves orders through their lifecycle and starts or stops tracking as the
/// order enters or leaves delivery.
///
/// Changes to one order are serialized: the load, the store write and the
/// session start or stop happen under that order's lock.
pub struct OrderStatusMachine {
    store: Arc<dyn OrderStore>,
    supervisor: Arc<TrackingSupervisor>,
    events_tx: broadcast::Sender<StatusEvent>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    metrics: Metrics,
}

impl OrderStatusMachine {
    pub fn new(
        store: Arc<dyn OrderStore>,
        supervisor: Arc<TrackingSupervisor>,
        metrics: Metrics,
        event_buffer_size: usize,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            store,
            supervisor,
            events_tx,
            locks: DashMap::new(),
            metrics,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events_tx.subscribe()
    }

    pub async fn place(&self, order: Order) -> Result<Order, TrackingError> {
        self.store.persist(&order).await?;
        self.publish(&order);
        info!(order_id = %order.id, "order placed");
        Ok(order)
    }

    pub async fn load(&self, order_id: Uuid) -> Result<Order, TrackingError> {
        self.store
            .load(order_id)
            .await?
            .ok_or(TrackingError::OrderNotFound(order_id))
    }

    /// Advances along the happy path to the next stage.
    pub async fn advance_next(&self, order_id: Uuid) -> Result<Order, TrackingError> {
        let order = self.load(order_id).await?;
        let next = order.status.next().ok_or(TrackingError::InvalidTransition {
            from: order.status,
            to: order.status,
        })?;
        self.advance(order_id, next).await
    }

    pub async fn advance(
        &self,
        order_id: Uuid,
        target: OrderTrackingState,
    ) -> Result<Order, TrackingError> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;

        let result = self.advance_locked(order_id, target).await;

        // terminal orders never change again, so their lock can go
        let settled = match &result {
            Ok(order) => order.status.is_terminal(),
            Err(err) => matches!(err, TrackingError::OrderNotFound(_)),
        };
        if settled {
            self.locks.remove(&order_id);
        }
        result
    }

    /// Starts tracking for an order that is already out for delivery, as when a
    /// client asks to resume a session that was stopped.
    pub async fn resume_tracking(&self, order_id: Uuid) -> Result<StartOutcome, TrackingError> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;

        let order = self.load(order_id).await?;
        if order.status != OrderTrackingState::OutForDelivery {
            return Err(TrackingError::InvalidTransition {
                from: order.status,
                to: OrderTrackingState::OutForDelivery,
            });
        }
        self.supervisor.start_tracking(&order).await
    }

    fn order_lock(&self, order_id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(order_id).or_default())
    }

    async fn advance_locked(
        &self,
        order_id: Uuid,
        target: OrderTrackingState,
    ) -> Result<Order, TrackingError> {
        let mut order = self.load(order_id).await?;

        if target == OrderTrackingState::OutForDelivery {
            if let Err(err) = endpoints(&order) {
                warn!(order_id = %order_id, error = %err, "cannot dispatch order");
                return Err(err);
            }
        }

        order.transition_to(target)?;

        if target == OrderTrackingState::OutForDelivery && order.courier.is_none() {
            let mut courier = Courier::new(DEFAULT_COURIER_NAME, VehicleType::default());
            if let Some(store_location) = order.store_location {
                courier.move_to(store_location);
            }
            info!(order_id = %order_id, courier_id = %courier.id, "courier assigned");
            order.courier = Some(courier);
        }

        self.store.persist(&order).await?;
        self.metrics
            .status_transitions_total
            .with_label_values(&[order.status.as_label()])
            .inc();
        self.publish(&order);
        info!(
            order_id = %order_id,
            status = ?order.status,
            eta_minutes = order.estimated_minutes_remaining(),
            "order status changed"
        );

        match target {
            OrderTrackingState::OutForDelivery => {
                self.supervisor.start_tracking(&order).await?;
            }
            OrderTrackingState::Delivered | OrderTrackingState::Cancelled => {
                self.supervisor.stop_tracking(order_id).await;
            }
            _ => {}
        }

        // stopping a session writes the courier back, so read the stored copy
        Ok(self.store.load(order_id).await?.unwrap_or(order))
    }

    fn publish(&self, order: &Order) {
        let _ = self.events_tx.send(StatusEvent::for_order(order));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::engine::supervisor::{SessionPhase, TrackingSettings};
    use crate::models::coordinate::Coordinate;
    use crate::models::order::TrackingMode;
    use crate::models::position::PositionUpdate;
    use crate::route::provider::{OfflineRouteProvider, PassthroughMapMatcher};
    use crate::store::InMemoryOrderStore;

    const STORE: Coordinate = Coordinate::new(12.90, 77.60);
    const CUSTOMER: Coordinate = Coordinate::new(12.92, 77.62);

    /// Store whose reads yield, so concurrent status changes interleave.
    struct SlowLoadStore {
        inner: InMemoryOrderStore,
    }

    #[async_trait]
    impl OrderStore for SlowLoadStore {
        async fn persist(&self, order: &Order) -> Result<(), TrackingError> {
            self.inner.persist(order).await
        }

        async fn load(&self, order_id: Uuid) -> Result<Option<Order>, TrackingError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.inner.load(order_id).await
        }

        async fn save_position(&self, update: &PositionUpdate) -> Result<(), TrackingError> {
            self.inner.save_position(update).await
        }

        async fn load_position(
            &self,
            order_id: Uuid,
        ) -> Result<Option<PositionUpdate>, TrackingError> {
            self.inner.load_position(order_id).await
        }
    }

    fn machine() -> (OrderStatusMachine, Arc<TrackingSupervisor>) {
        machine_with(Arc::new(InMemoryOrderStore::new()))
    }

    fn machine_with(store: Arc<dyn OrderStore>) -> (OrderStatusMachine, Arc<TrackingSupervisor>) {
        let metrics = Metrics::new();
        let settings = TrackingSettings {
            min_delivery_duration: Duration::from_secs(30),
            ..TrackingSettings::default()
        };
        let supervisor = Arc::new(TrackingSupervisor::new(
            Arc::new(OfflineRouteProvider),
            Arc::new(PassthroughMapMatcher),
            store.clone(),
            settings,
            metrics.clone(),
            1024,
        ));
        (
            OrderStatusMachine::new(store, supervisor.clone(), metrics, 1024),
            supervisor,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_emits_events_and_tracks() {
        let (machine, supervisor) = machine();
        let mut events = machine.subscribe();
        let order = machine
            .place(Order::new(Some(STORE), Some(CUSTOMER), TrackingMode::Simulated))
            .await
            .unwrap();

        for _ in 0..3 {
            machine.advance_next(order.id).await.unwrap();
        }

        let statuses: Vec<OrderTrackingState> = (0..4)
            .map(|_| events.try_recv().unwrap().status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                OrderTrackingState::Placed,
                OrderTrackingState::Confirmed,
                OrderTrackingState::Preparing,
                OrderTrackingState::OutForDelivery,
            ]
        );
        assert_eq!(supervisor.active_sessions(), 1);

        let delivered = machine
            .advance(order.id, OrderTrackingState::Delivered)
            .await
            .unwrap();
        assert_eq!(delivered.status, OrderTrackingState::Delivered);
        assert_eq!(delivered.estimated_minutes_remaining(), 0);
        assert_eq!(supervisor.active_sessions(), 0);
        assert_eq!(supervisor.phase_for(&delivered), SessionPhase::Stopped);
        assert_eq!(
            machine
                .metrics
                .status_transitions_total
                .with_label_values(&["delivered"])
                .get(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_assigns_courier_at_store() {
        let (machine, supervisor) = machine();
        let order = machine
            .place(Order::new(Some(STORE), Some(CUSTOMER), TrackingMode::Simulated))
            .await
            .unwrap();

        let dispatched = machine
            .advance(order.id, OrderTrackingState::OutForDelivery)
            .await
            .unwrap();

        let courier = dispatched.courier.clone().unwrap();
        assert_eq!(courier.position, Some(STORE));
        assert_eq!(dispatched.estimated_minutes_remaining(), 15);

        supervisor.stop_tracking(order.id).await;
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_without_customer_location_keeps_status() {
        let (machine, supervisor) = machine();
        let order = machine
            .place(Order::new(Some(STORE), None, TrackingMode::Simulated))
            .await
            .unwrap();

        let err = machine
            .advance(order.id, OrderTrackingState::OutForDelivery)
            .await
            .unwrap_err();

        assert!(matches!(err, TrackingError::AssignmentFailure { .. }));
        assert_eq!(machine.load(order.id).await.unwrap().status, OrderTrackingState::Placed);
        assert_eq!(supervisor.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_tracking_and_blocks_further_moves() {
        let (machine, supervisor) = machine();
        let order = machine
            .place(Order::new(Some(STORE), Some(CUSTOMER), TrackingMode::Simulated))
            .await
            .unwrap();
        machine
            .advance(order.id, OrderTrackingState::OutForDelivery)
            .await
            .unwrap();

        machine
            .advance(order.id, OrderTrackingState::Cancelled)
            .await
            .unwrap();
        assert_eq!(supervisor.active_sessions(), 0);

        let err = machine
            .advance(order.id, OrderTrackingState::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::InvalidTransition { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn reentering_out_for_delivery_restarts_single_session() {
        let (machine, supervisor) = machine();
        let order = machine
            .place(Order::new(Some(STORE), Some(CUSTOMER), TrackingMode::Simulated))
            .await
            .unwrap();

        machine
            .advance(order.id, OrderTrackingState::OutForDelivery)
            .await
            .unwrap();
        machine
            .advance(order.id, OrderTrackingState::OutForDelivery)
            .await
            .unwrap();

        assert_eq!(supervisor.active_sessions(), 1);
        supervisor.stop_tracking(order.id).await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_delivery_and_redispatch_leave_no_session() {
        let (machine, supervisor) = machine_with(Arc::new(SlowLoadStore {
            inner: InMemoryOrderStore::new(),
        }));
        let order = machine
            .place(Order::new(Some(STORE), Some(CUSTOMER), TrackingMode::Simulated))
            .await
            .unwrap();
        machine
            .advance(order.id, OrderTrackingState::OutForDelivery)
            .await
            .unwrap();

        let (delivered, redispatched) = tokio::join!(
            machine.advance(order.id, OrderTrackingState::Delivered),
            machine.advance(order.id, OrderTrackingState::OutForDelivery),
        );

        assert_eq!(delivered.unwrap().status, OrderTrackingState::Delivered);
        assert!(matches!(
            redispatched,
            Err(TrackingError::InvalidTransition { .. })
        ));

        let stored = machine.load(order.id).await.unwrap();
        assert_eq!(stored.status, OrderTrackingState::Delivered);
        assert_eq!(stored.history.len(), 3);
        assert_eq!(supervisor.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_order_releases_its_lock() {
        let (machine, _supervisor) = machine();
        let order = machine
            .place(Order::new(Some(STORE), Some(CUSTOMER), TrackingMode::Simulated))
            .await
            .unwrap();

        machine
            .advance(order.id, OrderTrackingState::Confirmed)
            .await
            .unwrap();
        assert!(machine.locks.contains_key(&order.id));

        machine
            .advance(order.id, OrderTrackingState::Cancelled)
            .await
            .unwrap();
        assert!(!machine.locks.contains_key(&order.id));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_to_store_location_is_rejected() {
        let (machine, supervisor) = machine();
        let order = machine
            .place(Order::new(Some(STORE), Some(STORE), TrackingMode::Simulated))
            .await
            .unwrap();

        let err = machine
            .advance(order.id, OrderTrackingState::OutForDelivery)
            .await
            .unwrap_err();

        assert!(matches!(err, TrackingError::AssignmentFailure { .. }));
        assert_eq!(machine.load(order.id).await.unwrap().status, OrderTrackingState::Placed);
        assert_eq!(supervisor.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_requires_out_for_delivery() {
        let (machine, supervisor) = machine();
        let order = machine
            .place(Order::new(Some(STORE), Some(CUSTOMER), TrackingMode::Simulated))
            .await
            .unwrap();

        let err = machine.resume_tracking(order.id).await.unwrap_err();
        assert!(matches!(err, TrackingError::InvalidTransition { .. }));

        machine
            .advance(order.id, OrderTrackingState::OutForDelivery)
            .await
            .unwrap();
        supervisor.stop_tracking(order.id).await;

        assert_eq!(
            machine.resume_tracking(order.id).await.unwrap(),
            StartOutcome::Started
        );
        assert_eq!(supervisor.active_sessions(), 1);
        supervisor.stop_tracking(order.id).await;
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let (machine, _supervisor) = machine();
        let err = machine
            .advance(Uuid::new_v4(), OrderTrackingState::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::OrderNotFound(_)));
    }
}
