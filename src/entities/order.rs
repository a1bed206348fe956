use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order aggregate root. Line items live in `order_items` and snapshot the
/// catalog price at checkout time; `total` is always the server-recomputed
/// amount, never the client-submitted one.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Externally visible order identifier (`ORD-...`), globally unique
    #[sea_orm(unique)]
    pub order_number: String,

    pub user_id: Uuid,
    pub delivery_address_id: Uuid,

    pub subtotal: Decimal,
    pub total: Decimal,

    /// `cod` or `online`
    pub payment_method: String,
    /// `pending`, `paid`, or `failed`
    pub payment_status: String,

    /// Remote payment-gateway order identifier; set only for online orders.
    /// Doubles as the idempotency key for verification.
    #[sea_orm(unique)]
    pub gateway_order_ref: Option<String>,

    pub gateway_payment_ref: Option<String>,
    pub payment_signature: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,

    /// See `services::order_status::OrderStatus` for the closed value set
    pub status: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }

        if let ActiveValue::NotSet = active_model.updated_at {
            active_model.updated_at = Set(Some(now));
        }

        Ok(active_model)
    }
}
