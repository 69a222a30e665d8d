use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrackingError;
use crate::models::coordinate::Coordinate;
use crate::models::courier::Courier;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderTrackingState {
    Placed,
    Confirmed,
    Preparing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderTrackingState {
    pub fn estimated_minutes_remaining(self) -> u32 {
        match self {
            OrderTrackingState::Placed => 35,
            OrderTrackingState::Confirmed => 33,
            OrderTrackingState::Preparing => 25,
            OrderTrackingState::OutForDelivery => 15,
            OrderTrackingState::Delivered | OrderTrackingState::Cancelled => 0,
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            OrderTrackingState::Placed => "placed",
            OrderTrackingState::Confirmed => "confirmed",
            OrderTrackingState::Preparing => "preparing",
            OrderTrackingState::OutForDelivery => "out_for_delivery",
            OrderTrackingState::Delivered => "delivered",
            OrderTrackingState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderTrackingState::Delivered | OrderTrackingState::Cancelled
        )
    }

    /// The next stage of the happy path, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            OrderTrackingState::Placed => Some(OrderTrackingState::Confirmed),
            OrderTrackingState::Confirmed => Some(OrderTrackingState::Preparing),
            OrderTrackingState::Preparing => Some(OrderTrackingState::OutForDelivery),
            OrderTrackingState::OutForDelivery => Some(OrderTrackingState::Delivered),
            OrderTrackingState::Delivered | OrderTrackingState::Cancelled => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            OrderTrackingState::Placed => 0,
            OrderTrackingState::Confirmed => 1,
            OrderTrackingState::Preparing => 2,
            OrderTrackingState::OutForDelivery => 3,
            OrderTrackingState::Delivered => 4,
            OrderTrackingState::Cancelled => 5,
        }
    }

    /// Forward moves only. `Cancelled` is reachable from any non-terminal state
    /// and `OutForDelivery` may be re-entered as a correction.
    pub fn can_transition_to(self, target: Self) -> bool {
        if self.is_terminal() {
            return false;
        }

        match target {
            OrderTrackingState::Cancelled => true,
            OrderTrackingState::OutForDelivery if self == target => true,
            _ => target.rank() > self.rank(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TrackingMode {
    Simulated,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub status: OrderTrackingState,
    pub at: DateTime<Utc>,
    pub estimated_minutes_remaining: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub store_location: Option<Coordinate>,
    pub customer_location: Option<Coordinate>,
    pub status: OrderTrackingState,
    pub history: Vec<StatusTransition>,
    pub courier: Option<Courier>,
    pub tracking_mode: TrackingMode,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        store_location: Option<Coordinate>,
        customer_location: Option<Coordinate>,
        tracking_mode: TrackingMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            store_location,
            customer_location,
            status: OrderTrackingState::Placed,
            history: vec![StatusTransition {
                status: OrderTrackingState::Placed,
                at: now,
                estimated_minutes_remaining: OrderTrackingState::Placed
                    .estimated_minutes_remaining(),
            }],
            courier: None,
            tracking_mode,
            created_at: now,
        }
    }

    pub fn estimated_minutes_remaining(&self) -> u32 {
        self.status.estimated_minutes_remaining()
    }

    /// When the current status was entered.
    pub fn status_changed_at(&self) -> DateTime<Utc> {
        self.history
            .last()
            .map(|transition| transition.at)
            .unwrap_or(self.created_at)
    }

    /// Whether the order has ever gone out for delivery.
    pub fn was_dispatched(&self) -> bool {
        self.history
            .iter()
            .any(|transition| transition.status == OrderTrackingState::OutForDelivery)
    }

    pub fn transition_to(&mut self, target: OrderTrackingState) -> Result<(), TrackingError> {
        if !self.status.can_transition_to(target) {
            return Err(TrackingError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        let mut at = Utc::now();
        // keep history timestamps strictly increasing so a re-entry is a new session key
        if at <= self.status_changed_at() {
            at = self.status_changed_at() + chrono::Duration::microseconds(1);
        }

        self.status = target;
        self.history.push(StatusTransition {
            status: target,
            at,
            estimated_minutes_remaining: target.estimated_minutes_remaining(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order::new(
            Some(Coordinate::new(12.90, 77.60)),
            Some(Coordinate::new(12.92, 77.62)),
            TrackingMode::Simulated,
        )
    }

    #[test]
    fn new_order_starts_placed_with_history_entry() {
        let order = order();
        assert_eq!(order.status, OrderTrackingState::Placed);
        assert_eq!(order.history.len(), 1);
        assert_eq!(order.estimated_minutes_remaining(), 35);
    }

    #[test]
    fn forward_transitions_are_recorded() {
        let mut order = order();
        order.transition_to(OrderTrackingState::Confirmed).unwrap();
        order.transition_to(OrderTrackingState::Preparing).unwrap();

        assert_eq!(order.status, OrderTrackingState::Preparing);
        assert_eq!(order.history.len(), 3);
        assert_eq!(order.history[2].estimated_minutes_remaining, 25);
    }

    #[test]
    fn labels_are_snake_case() {
        assert_eq!(OrderTrackingState::Placed.as_label(), "placed");
        assert_eq!(OrderTrackingState::OutForDelivery.as_label(), "out_for_delivery");
        assert_eq!(OrderTrackingState::Cancelled.as_label(), "cancelled");
    }

    #[test]
    fn dispatch_is_remembered_after_delivery() {
        let mut order = order();
        assert!(!order.was_dispatched());

        order.transition_to(OrderTrackingState::OutForDelivery).unwrap();
        order.transition_to(OrderTrackingState::Delivered).unwrap();
        assert!(order.was_dispatched());

        let mut cancelled = self::order();
        cancelled.transition_to(OrderTrackingState::Cancelled).unwrap();
        assert!(!cancelled.was_dispatched());
    }

    #[test]
    fn backward_transition_is_rejected() {
        let mut order = order();
        order.transition_to(OrderTrackingState::Preparing).unwrap();

        let err = order.transition_to(OrderTrackingState::Confirmed).unwrap_err();
        assert!(matches!(err, TrackingError::InvalidTransition { .. }));
        assert_eq!(order.status, OrderTrackingState::Preparing);
    }

    #[test]
    fn cancel_allowed_from_any_non_terminal_state() {
        for target in [
            OrderTrackingState::Placed,
            OrderTrackingState::Confirmed,
            OrderTrackingState::Preparing,
            OrderTrackingState::OutForDelivery,
        ] {
            assert!(target.can_transition_to(OrderTrackingState::Cancelled));
        }
        assert!(!OrderTrackingState::Delivered.can_transition_to(OrderTrackingState::Cancelled));
        assert!(!OrderTrackingState::Cancelled.can_transition_to(OrderTrackingState::Cancelled));
    }

    #[test]
    fn out_for_delivery_reentry_gets_fresh_timestamp() {
        let mut order = order();
        order.transition_to(OrderTrackingState::OutForDelivery).unwrap();
        let first = order.status_changed_at();

        order.transition_to(OrderTrackingState::OutForDelivery).unwrap();
        assert!(order.status_changed_at() > first);
    }

    #[test]
    fn eta_table_matches_stages() {
        let etas: Vec<u32> = [
            OrderTrackingState::Placed,
            OrderTrackingState::Confirmed,
            OrderTrackingState::Preparing,
            OrderTrackingState::OutForDelivery,
            OrderTrackingState::Delivered,
        ]
        .into_iter()
        .map(OrderTrackingState::estimated_minutes_remaining)
        .collect();

        assert_eq!(etas, vec![35, 33, 25, 15, 0]);
    }

    #[test]
    fn status_serializes_as_variant_name() {
        let json = serde_json::to_string(&OrderTrackingState::OutForDelivery).unwrap();
        assert_eq!(json, "\"OutForDelivery\"");
    }
}
