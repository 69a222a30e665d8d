use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TrackingError;
use crate::models::order::Order;
use crate::models::position::PositionUpdate;

/// Persistence backend for orders and their latest courier position.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn persist(&self, order: &Order) -> Result<(), TrackingError>;

    async fn load(&self, order_id: Uuid) -> Result<Option<Order>, TrackingError>;

    async fn save_position(&self, update: &PositionUpdate) -> Result<(), TrackingError>;

    async fn load_position(&self, order_id: Uuid) -> Result<Option<PositionUpdate>, TrackingError>;
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, Order>,
    positions: DashMap<Uuid, PositionUpdate>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn persist(&self, order: &Order) -> Result<(), TrackingError> {
        self.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn load(&self, order_id: Uuid) -> Result<Option<Order>, TrackingError> {
        Ok(self.orders.get(&order_id).map(|entry| entry.value().clone()))
    }

    async fn save_position(&self, update: &PositionUpdate) -> Result<(), TrackingError> {
        self.positions.insert(update.order_id, update.clone());
        Ok(())
    }

    async fn load_position(&self, order_id: Uuid) -> Result<Option<PositionUpdate>, TrackingError> {
        Ok(self.positions.get(&order_id).map(|entry| entry.value().clone()))
    }
}

/// Writes every emitted position to the store until the update channel closes.
pub async fn run_position_persister(
    store: std::sync::Arc<dyn OrderStore>,
    mut updates: broadcast::Receiver<PositionUpdate>,
) {
    info!("position persister started");

    loop {
        match updates.recv().await {
            Ok(update) => {
                if let Err(err) = store.save_position(&update).await {
                    warn!(order_id = %update.order_id, error = %err, "failed to persist position");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "position persister lagged; older positions dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }

    warn!("position persister stopped: update channel closed");
}
