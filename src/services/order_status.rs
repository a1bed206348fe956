use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set, TransactionTrait,
};
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::order;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Lifecycle of an order. Transitions only move forward; `Delivered`,
/// `Cancelled` and `PaymentFailed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum OrderStatus {
    #[strum(to_string = "PENDING_PAYMENT", serialize = "PENDING")]
    PendingPayment,
    #[strum(serialize = "PROCESSING")]
    Processing,
    #[strum(serialize = "SHIPPED")]
    Shipped,
    #[strum(serialize = "DELIVERED")]
    Delivered,
    #[strum(serialize = "CANCELLED")]
    Cancelled,
    #[strum(serialize = "PAYMENT_FAILED")]
    PaymentFailed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::PaymentFailed
        )
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, target) {
            // Any non-terminal order can be cancelled (admin override, ban cascade).
            (from, Cancelled) if !from.is_terminal() => true,
            (PendingPayment, Processing) => true,
            (PendingPayment, PaymentFailed) => true,
            (Processing, Shipped) => true,
            (Shipped, Delivered) => true,
            _ => false,
        }
    }

    /// Parses an incoming status string, honoring the legacy `PENDING` alias.
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        OrderStatus::from_str(value).map_err(|_| ServiceError::InvalidStatus(value.to_string()))
    }
}

/// Admin-facing status transitions. Never touches pricing or stock; a
/// cancelled order does not restock by itself.
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: &str,
    ) -> Result<order::Model, ServiceError> {
        let target = OrderStatus::parse(new_status)?;

        let existing = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let current = OrderStatus::parse(&existing.status)?;
        if !current.can_transition_to(target) {
            return Err(ServiceError::InvalidTransition {
                from: current.to_string(),
                to: target.to_string(),
            });
        }

        let old_status = existing.status.clone();
        let version = existing.version;
        let mut active = existing.into_active_model();
        active.status = Set(target.to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(self.db.as_ref()).await?;

        info!(%order_id, from = %old_status, to = %target, "order status updated");
        self.event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: target.to_string(),
            })
            .await;

        Ok(updated)
    }

    /// Force-cancels every non-terminal order of a user. Invoked by the admin
    /// ban flow; terminal orders are left untouched.
    #[instrument(skip(self))]
    pub async fn cancel_open_orders_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let open_statuses: Vec<String> = OrderStatus::iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.to_string())
            .collect();

        let txn = self.db.begin().await?;
        let open_orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.is_in(open_statuses))
            .all(&txn)
            .await?;

        let mut cancelled = 0u64;
        for existing in open_orders {
            let order_id = existing.id;
            let old_status = existing.status.clone();
            let version = existing.version;
            let mut active = existing.into_active_model();
            active.status = Set(OrderStatus::Cancelled.to_string());
            active.updated_at = Set(Some(Utc::now()));
            active.version = Set(version + 1);
            active.update(&txn).await?;
            cancelled += 1;

            self.event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status: OrderStatus::Cancelled.to_string(),
                })
                .await;
        }
        txn.commit().await?;

        if cancelled > 0 {
            info!(%user_id, cancelled, "cancelled open orders for banned user");
            self.event_sender
                .send(Event::OrdersCancelledForUser {
                    user_id,
                    count: cancelled,
                })
                .await;
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("PENDING_PAYMENT", OrderStatus::PendingPayment)]
    #[test_case("PENDING", OrderStatus::PendingPayment; "legacy alias")]
    #[test_case("PROCESSING", OrderStatus::Processing)]
    #[test_case("SHIPPED", OrderStatus::Shipped)]
    #[test_case("DELIVERED", OrderStatus::Delivered)]
    #[test_case("CANCELLED", OrderStatus::Cancelled)]
    #[test_case("PAYMENT_FAILED", OrderStatus::PaymentFailed)]
    fn parses_known_statuses(input: &str, expected: OrderStatus) {
        assert_eq!(OrderStatus::parse(input).unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(matches!(
            OrderStatus::parse("REFUNDED"),
            Err(ServiceError::InvalidStatus(_))
        ));
    }

    #[test]
    fn pending_payment_serializes_canonically() {
        assert_eq!(OrderStatus::PendingPayment.to_string(), "PENDING_PAYMENT");
    }

    #[test_case(OrderStatus::PendingPayment, OrderStatus::Processing, true)]
    #[test_case(OrderStatus::PendingPayment, OrderStatus::PaymentFailed, true)]
    #[test_case(OrderStatus::PendingPayment, OrderStatus::Cancelled, true)]
    #[test_case(OrderStatus::Processing, OrderStatus::Shipped, true)]
    #[test_case(OrderStatus::Processing, OrderStatus::Cancelled, true)]
    #[test_case(OrderStatus::Shipped, OrderStatus::Delivered, true)]
    #[test_case(OrderStatus::Shipped, OrderStatus::Cancelled, true)]
    #[test_case(OrderStatus::Processing, OrderStatus::PendingPayment, false; "no backward moves")]
    #[test_case(OrderStatus::Delivered, OrderStatus::Cancelled, false; "delivered is terminal")]
    #[test_case(OrderStatus::Cancelled, OrderStatus::Processing, false; "cancelled is terminal")]
    #[test_case(OrderStatus::PaymentFailed, OrderStatus::Processing, false; "failed is terminal")]
    #[test_case(OrderStatus::PendingPayment, OrderStatus::Shipped, false; "no skipping")]
    fn transition_table(from: OrderStatus, to: OrderStatus, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::PaymentFailed.is_terminal());
        assert!(!OrderStatus::PendingPayment.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(!OrderStatus::Shipped.is_terminal());
    }
}
