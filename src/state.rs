use std::sync::Arc;

use crate::engine::status::OrderStatusMachine;
use crate::engine::supervisor::{TrackingSettings, TrackingSupervisor};
use crate::observability::metrics::Metrics;
use crate::route::provider::{MapMatcher, RouteProvider};
use crate::store::{InMemoryOrderStore, OrderStore};

pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub supervisor: Arc<TrackingSupervisor>,
    pub orders: OrderStatusMachine,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        settings: TrackingSettings,
        event_buffer_size: usize,
        routes: Arc<dyn RouteProvider>,
        matcher: Arc<dyn MapMatcher>,
    ) -> Self {
        let store: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());
        let metrics = Metrics::new();

        let supervisor = Arc::new(TrackingSupervisor::new(
            routes,
            matcher,
            store.clone(),
            settings,
            metrics.clone(),
            event_buffer_size,
        ));
        let orders = OrderStatusMachine::new(
            store.clone(),
            supervisor.clone(),
            metrics.clone(),
            event_buffer_size,
        );

        Self {
            store,
            supervisor,
            orders,
            metrics,
        }
    }
}
