use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{address, cart_item, order, order_history, order_item, product, user};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::order_status::OrderStatus;
use crate::services::payments::{self, PaymentGateway};
use crate::services::{pricing, stock};

pub const PAYMENT_METHOD_COD: &str = "cod";
pub const PAYMENT_METHOD_ONLINE: &str = "online";

pub const PAYMENT_STATUS_PENDING: &str = "pending";
pub const PAYMENT_STATUS_PAID: &str = "paid";
pub const PAYMENT_STATUS_FAILED: &str = "failed";

/// Checkout knobs sourced from [`crate::config::AppConfig`].
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub gateway_key_id: String,
    pub gateway_key_secret: String,
    pub currency: String,
    pub min_online_amount: Decimal,
}

/// One requested line, quantity taken from the client, price never.
#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub delivery_address_id: Uuid,
    pub items: Vec<NewOrderLine>,
    /// Client-computed total, verified against the catalog before anything
    /// is persisted.
    pub claimed_total: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub order_number: String,
    pub total: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Everything the storefront needs to open the gateway's checkout widget.
#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineCheckout {
    pub order_id: Uuid,
    pub order_number: String,
    pub gateway_order_ref: String,
    pub amount_minor: i64,
    pub currency: String,
    pub key_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub name: String,
    pub image: Option<String>,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub quantity: i32,
    pub purchased_price: Decimal,
    /// `purchased_price * quantity`, precomputed for display
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub delivery_address_id: Uuid,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub payment_method: String,
    pub payment_status: String,
    pub gateway_order_ref: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

/// Coordinates pricing, stock, the gateway and persistence for both
/// checkout flows. Every mutation runs inside one transaction.
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    gateway: Arc<dyn PaymentGateway>,
    settings: CheckoutSettings,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            settings,
        }
    }

    /// Cash-on-delivery checkout. Stock is committed immediately since there
    /// is no settlement step; the order lands in `PROCESSING`.
    #[instrument(skip(self, new_order), fields(user_id = %user_id))]
    pub async fn place_cod_order(
        &self,
        user_id: Uuid,
        new_order: NewOrder,
    ) -> Result<OrderConfirmation, ServiceError> {
        validate_lines(&new_order.items)?;

        let txn = self.db.begin().await?;
        load_active_account(&txn, user_id).await?;
        verify_address_ownership(&txn, user_id, new_order.delivery_address_id).await?;

        let priced = load_and_price(&txn, &new_order.items).await?;
        pricing::verify_order_total(&priced, new_order.claimed_total)?;

        for line in &priced.lines {
            stock::decrement(&txn, line.product_id, &line.name, line.quantity).await?;
        }

        let order_model = insert_order(
            &txn,
            user_id,
            &new_order,
            &priced,
            PAYMENT_METHOD_COD,
            PAYMENT_STATUS_PENDING,
            OrderStatus::Processing,
            None,
        )
        .await?;
        insert_order_items(&txn, order_model.id, &priced).await?;
        append_order_history(&txn, user_id, order_model.id).await?;
        clear_cart(&txn, user_id).await?;
        txn.commit().await?;

        info!(order_id = %order_model.id, order_number = %order_model.order_number, "cod order placed");
        self.event_sender
            .send(Event::OrderCreated {
                order_id: order_model.id,
                user_id,
                payment_method: PAYMENT_METHOD_COD.to_string(),
            })
            .await;

        Ok(OrderConfirmation {
            order_id: order_model.id,
            order_number: order_model.order_number,
            total: order_model.total,
            status: order_model.status,
            created_at: order_model.created_at,
        })
    }

    /// Online checkout intent. Registers the amount with the gateway first;
    /// stock and cart are untouched until the payment verifies, so an
    /// abandoned attempt never holds inventory.
    #[instrument(skip(self, new_order), fields(user_id = %user_id))]
    pub async fn place_online_order(
        &self,
        user_id: Uuid,
        new_order: NewOrder,
    ) -> Result<OnlineCheckout, ServiceError> {
        validate_lines(&new_order.items)?;

        // Reads and the gateway call run outside the write transaction so a
        // slow gateway never pins a pooled connection.
        let conn = self.db.as_ref();
        let account = load_active_account(conn, user_id).await?;
        verify_address_ownership(conn, user_id, new_order.delivery_address_id).await?;

        let priced = load_and_price(conn, &new_order.items).await?;
        pricing::verify_order_total(&priced, new_order.claimed_total)?;

        if priced.subtotal < self.settings.min_online_amount {
            return Err(ServiceError::ValidationError(format!(
                "online payment requires a minimum order of {} {}",
                self.settings.min_online_amount, self.settings.currency
            )));
        }

        // Availability check only; the decrement waits for verification.
        for line in &priced.lines {
            stock::check_availability(conn, line.product_id, line.quantity).await?;
        }

        let order_number = generate_order_number();
        let amount_minor = payments::to_minor_units(priced.subtotal)?;
        let remote = self
            .gateway
            .create_remote_order(amount_minor, &self.settings.currency, &order_number)
            .await?;

        let txn = self.db.begin().await?;
        let order_model = insert_order_with_number(
            &txn,
            user_id,
            &new_order,
            &priced,
            order_number,
            PAYMENT_METHOD_ONLINE,
            PAYMENT_STATUS_PENDING,
            OrderStatus::PendingPayment,
            Some(remote.order_ref.clone()),
        )
        .await?;
        insert_order_items(&txn, order_model.id, &priced).await?;
        append_order_history(&txn, user_id, order_model.id).await?;
        txn.commit().await?;

        info!(order_id = %order_model.id, gateway_order_ref = %remote.order_ref, "online order awaiting payment");
        self.event_sender
            .send(Event::OrderCreated {
                order_id: order_model.id,
                user_id,
                payment_method: PAYMENT_METHOD_ONLINE.to_string(),
            })
            .await;

        Ok(OnlineCheckout {
            order_id: order_model.id,
            order_number: order_model.order_number,
            gateway_order_ref: remote.order_ref,
            amount_minor: remote.amount_minor,
            currency: remote.currency,
            key_id: self.settings.gateway_key_id.clone(),
            customer_name: account.name,
            customer_email: account.email,
            customer_phone: account.phone,
        })
    }

    /// Settles an online payment. The settle is one conditional UPDATE keyed
    /// on the gateway reference plus the still-pending state, which makes
    /// duplicate callbacks harmless: the second one matches zero rows and
    /// gets `OrderNotProcessable`.
    #[instrument(skip(self, signature), fields(user_id = %user_id, gateway_order_ref = %gateway_order_ref))]
    pub async fn verify_payment(
        &self,
        user_id: Uuid,
        gateway_order_ref: &str,
        gateway_payment_ref: &str,
        signature: &str,
    ) -> Result<OrderConfirmation, ServiceError> {
        if !payments::verify_signature(
            &self.settings.gateway_key_secret,
            gateway_order_ref,
            gateway_payment_ref,
            signature,
        ) {
            warn!("payment signature rejected");
            return Err(ServiceError::SignatureMismatch);
        }

        let txn = self.db.begin().await?;
        let now = Utc::now();
        // The pending-state filters make this a no-op for anything already
        // settled or failed; a concurrent callback loses the race here and
        // never reaches the stock decrements.
        let flipped = order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Processing.to_string()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PAYMENT_STATUS_PAID),
            )
            .col_expr(
                order::Column::GatewayPaymentRef,
                Expr::value(gateway_payment_ref),
            )
            .col_expr(order::Column::PaymentSignature, Expr::value(signature))
            .col_expr(order::Column::PaidAt, Expr::value(now))
            .col_expr(order::Column::VerifiedAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::GatewayOrderRef.eq(gateway_order_ref))
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.eq(OrderStatus::PendingPayment.to_string()))
            .filter(order::Column::PaymentStatus.eq(PAYMENT_STATUS_PENDING))
            .exec(&txn)
            .await?;
        if flipped.rows_affected == 0 {
            return Err(ServiceError::OrderNotProcessable);
        }

        let updated = order::Entity::find()
            .filter(order::Column::GatewayOrderRef.eq(gateway_order_ref))
            .filter(order::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
            .ok_or(ServiceError::OrderNotProcessable)?;
        let order_id = updated.id;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        for item in &items {
            stock::decrement(&txn, item.product_id, &item.name, item.quantity).await?;
        }

        clear_cart(&txn, user_id).await?;
        txn.commit().await?;

        info!(%order_id, "payment verified, order settled");
        self.event_sender
            .send(Event::PaymentVerified {
                order_id,
                gateway_payment_ref: gateway_payment_ref.to_string(),
            })
            .await;

        Ok(OrderConfirmation {
            order_id: updated.id,
            order_number: updated.order_number,
            total: updated.total,
            status: updated.status,
            created_at: updated.created_at,
        })
    }

    /// Marks an abandoned or gateway-declined attempt. One conditional
    /// UPDATE with the same pending-state guard as verification, so a
    /// settled order can never be flipped back even when the widget's
    /// dismiss handler races a success callback.
    #[instrument(skip(self), fields(user_id = %user_id, gateway_order_ref = %gateway_order_ref))]
    pub async fn mark_payment_failed(
        &self,
        user_id: Uuid,
        gateway_order_ref: &str,
    ) -> Result<OrderConfirmation, ServiceError> {
        let flipped = order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::PaymentFailed.to_string()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PAYMENT_STATUS_FAILED),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::GatewayOrderRef.eq(gateway_order_ref))
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.eq(OrderStatus::PendingPayment.to_string()))
            .filter(order::Column::PaymentStatus.eq(PAYMENT_STATUS_PENDING))
            .exec(self.db.as_ref())
            .await?;
        if flipped.rows_affected == 0 {
            return Err(ServiceError::OrderNotProcessable);
        }

        let updated = order::Entity::find()
            .filter(order::Column::GatewayOrderRef.eq(gateway_order_ref))
            .filter(order::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?
            .ok_or(ServiceError::OrderNotProcessable)?;
        let order_id = updated.id;

        info!(%order_id, "payment marked failed");
        self.event_sender.send(Event::PaymentFailed { order_id }).await;

        Ok(OrderConfirmation {
            order_id: updated.id,
            order_number: updated.order_number,
            total: updated.total,
            status: updated.status,
            created_at: updated.created_at,
        })
    }

    /// Fetches an order with its line items. Non-admin callers only see
    /// their own orders; anything else reads as not found.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        requester: Uuid,
        is_admin: bool,
    ) -> Result<OrderResponse, ServiceError> {
        let model = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !is_admin && model.user_id != requester {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_id
            )));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(self.db.as_ref())
            .await?;
        Ok(model_to_response(model, items))
    }

    #[instrument(skip(self))]
    pub async fn list_user_orders(
        &self,
        user_id: Uuid,
        status: Option<String>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        let mut query = order::Entity::find().filter(order::Column::UserId.eq(user_id));
        if let Some(status) = status {
            let parsed = OrderStatus::parse(&status)?;
            query = query.filter(order::Column::Status.eq(parsed.to_string()));
        }
        self.paginate(query, page, limit).await
    }

    #[instrument(skip(self))]
    pub async fn list_orders_admin(
        &self,
        status: Option<String>,
        user_id: Option<Uuid>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        let mut query = order::Entity::find();
        if let Some(status) = status {
            let parsed = OrderStatus::parse(&status)?;
            query = query.filter(order::Column::Status.eq(parsed.to_string()));
        }
        if let Some(user_id) = user_id {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        self.paginate(query, page, limit).await
    }

    async fn paginate(
        &self,
        query: sea_orm::Select<order::Entity>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(self.db.as_ref(), limit);
        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut responses = Vec::with_capacity(models.len());
        for model in models {
            let items = order_item::Entity::find()
                .filter(order_item::Column::OrderId.eq(model.id))
                .all(self.db.as_ref())
                .await?;
            responses.push(model_to_response(model, items));
        }
        Ok((responses, total))
    }
}

fn validate_lines(items: &[NewOrderLine]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "order must contain at least one item".to_string(),
        ));
    }
    if items.iter().any(|line| line.quantity < 1) {
        return Err(ServiceError::ValidationError(
            "item quantity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Confirms the account exists and may transact. Banned users keep read
/// access to their history but cannot check out.
async fn load_active_account<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<user::Model, ServiceError> {
    let account = user::Entity::find_by_id(user_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))?;
    if account.status == "banned" {
        return Err(ServiceError::Forbidden(
            "account is not allowed to place orders".to_string(),
        ));
    }
    Ok(account)
}

async fn verify_address_ownership<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    address_id: Uuid,
) -> Result<address::Model, ServiceError> {
    address::Entity::find_by_id(address_id)
        .filter(address::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::ValidationError("delivery address not found".to_string()))
}

async fn load_and_price<C: ConnectionTrait>(
    conn: &C,
    items: &[NewOrderLine],
) -> Result<pricing::PricedCart, ServiceError> {
    let ids: Vec<Uuid> = items.iter().map(|line| line.product_id).collect();
    let products = product::Entity::find()
        .filter(product::Column::Id.is_in(ids))
        .all(conn)
        .await?;

    let mut pairs = Vec::with_capacity(items.len());
    for line in items {
        let model = products
            .iter()
            .find(|p| p.id == line.product_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", line.product_id))
            })?;
        pairs.push((model, line.quantity));
    }
    Ok(pricing::price_cart(&pairs))
}

#[allow(clippy::too_many_arguments)]
async fn insert_order(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    new_order: &NewOrder,
    priced: &pricing::PricedCart,
    payment_method: &str,
    payment_status: &str,
    status: OrderStatus,
    gateway_order_ref: Option<String>,
) -> Result<order::Model, ServiceError> {
    insert_order_with_number(
        txn,
        user_id,
        new_order,
        priced,
        generate_order_number(),
        payment_method,
        payment_status,
        status,
        gateway_order_ref,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn insert_order_with_number(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    new_order: &NewOrder,
    priced: &pricing::PricedCart,
    order_number: String,
    payment_method: &str,
    payment_status: &str,
    status: OrderStatus,
    gateway_order_ref: Option<String>,
) -> Result<order::Model, ServiceError> {
    let active = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_number: Set(order_number),
        user_id: Set(user_id),
        delivery_address_id: Set(new_order.delivery_address_id),
        subtotal: Set(priced.subtotal),
        total: Set(priced.subtotal),
        payment_method: Set(payment_method.to_string()),
        payment_status: Set(payment_status.to_string()),
        gateway_order_ref: Set(gateway_order_ref),
        gateway_payment_ref: Set(None),
        payment_signature: Set(None),
        paid_at: Set(None),
        verified_at: Set(None),
        status: Set(status.to_string()),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
        version: Set(1),
    };
    Ok(active.insert(txn).await?)
}

async fn insert_order_items(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    priced: &pricing::PricedCart,
) -> Result<(), ServiceError> {
    for line in &priced.lines {
        let active = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            name: Set(line.name.clone()),
            image: Set(line.image.clone()),
            unit_price: Set(line.unit_price),
            discount_percent: Set(line.discount_percent),
            quantity: Set(line.quantity),
            purchased_price: Set(line.purchased_price),
            created_at: Set(Utc::now()),
        };
        active.insert(txn).await?;
    }
    Ok(())
}

async fn append_order_history(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    order_id: Uuid,
) -> Result<(), ServiceError> {
    let active = order_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        order_id: Set(order_id),
        created_at: Set(Utc::now()),
    };
    active.insert(txn).await?;
    Ok(())
}

async fn clear_cart(txn: &DatabaseTransaction, user_id: Uuid) -> Result<(), ServiceError> {
    cart_item::Entity::delete_many()
        .filter(cart_item::Column::UserId.eq(user_id))
        .exec(txn)
        .await?;
    Ok(())
}

fn model_to_response(model: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        user_id: model.user_id,
        delivery_address_id: model.delivery_address_id,
        subtotal: model.subtotal,
        total: model.total,
        payment_method: model.payment_method,
        payment_status: model.payment_status,
        gateway_order_ref: model.gateway_order_ref,
        status: model.status,
        created_at: model.created_at,
        updated_at: model.updated_at,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id,
                name: item.name,
                image: item.image,
                unit_price: item.unit_price,
                discount_percent: item.discount_percent,
                quantity: item.quantity,
                line_total: item.purchased_price * Decimal::from(item.quantity),
                purchased_price: item.purchased_price,
            })
            .collect(),
    }
}

/// Human-readable order number, unique enough for receipts; the database
/// unique constraint backstops collisions.
fn generate_order_number() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..1000);
    format!("ORD-{}-{:03}", millis, suffix)
}
