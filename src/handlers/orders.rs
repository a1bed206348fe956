use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::services::orders::{
    NewOrder, NewOrderLine, OnlineCheckout, OrderConfirmation, OrderResponse,
};
use crate::{ApiResponse, AppState, PaginatedResponse};

#[derive(Debug, serde::Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct OrderLineRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PlaceOrderRequest {
    pub delivery_address_id: Uuid,
    #[validate(length(min = 1, message = "order must contain at least one item"))]
    pub items: Vec<OrderLineRequest>,
    /// Client-side total; the server recomputes and rejects any drift.
    pub total: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1))]
    pub gateway_order_ref: String,
    #[validate(length(min = 1))]
    pub gateway_payment_ref: String,
    #[validate(length(min = 1))]
    pub signature: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PaymentFailedRequest {
    #[validate(length(min = 1))]
    pub gateway_order_ref: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusRequest {
    #[validate(length(min = 1))]
    pub status: String,
}

/// Pagination parameters plus the order-specific filters.
#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
    pub status: Option<String>,
    pub user_id: Option<Uuid>,
}

fn into_new_order(req: PlaceOrderRequest) -> NewOrder {
    NewOrder {
        delivery_address_id: req.delivery_address_id,
        items: req
            .items
            .into_iter()
            .map(|line| NewOrderLine {
                product_id: line.product_id,
                quantity: line.quantity,
            })
            .collect(),
        claimed_total: req.total,
    }
}

/// Place a cash-on-delivery order
#[utoipa::path(
    post,
    path = "/api/v1/orders/cash-on-delivery",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderConfirmation>),
        (status = 400, description = "Validation or price mismatch", body = crate::errors::ErrorResponse),
        (status = 409, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn place_cod_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderConfirmation>>), ServiceError> {
    payload.validate()?;
    let confirmation = state
        .services
        .orders
        .place_cod_order(auth_user.user_id, into_new_order(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(confirmation))))
}

/// Start an online-payment checkout
#[utoipa::path(
    post,
    path = "/api/v1/orders/online-payment",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Checkout created", body = ApiResponse<OnlineCheckout>),
        (status = 400, description = "Validation or price mismatch", body = crate::errors::ErrorResponse),
        (status = 409, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn place_online_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OnlineCheckout>>), ServiceError> {
    payload.validate()?;
    let checkout = state
        .services
        .orders
        .place_online_order(auth_user.user_id, into_new_order(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(checkout))))
}

/// Verify a completed gateway payment and settle the order
#[utoipa::path(
    post,
    path = "/api/v1/orders/verify-payment",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified", body = ApiResponse<OrderConfirmation>),
        (status = 400, description = "Signature mismatch", body = crate::errors::ErrorResponse),
        (status = 404, description = "No pending order for reference", body = crate::errors::ErrorResponse),
        (status = 409, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<Json<ApiResponse<OrderConfirmation>>, ServiceError> {
    payload.validate()?;
    let confirmation = state
        .services
        .orders
        .verify_payment(
            auth_user.user_id,
            &payload.gateway_order_ref,
            &payload.gateway_payment_ref,
            &payload.signature,
        )
        .await?;
    Ok(Json(ApiResponse::success(confirmation)))
}

/// Record an abandoned or declined payment attempt
#[utoipa::path(
    post,
    path = "/api/v1/orders/payment-failed",
    request_body = PaymentFailedRequest,
    responses(
        (status = 200, description = "Order marked failed", body = ApiResponse<OrderConfirmation>),
        (status = 404, description = "No pending order for reference", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn payment_failed(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<PaymentFailedRequest>,
) -> Result<Json<ApiResponse<OrderConfirmation>>, ServiceError> {
    payload.validate()?;
    let confirmation = state
        .services
        .orders
        .mark_payment_failed(auth_user.user_id, &payload.gateway_order_ref)
        .await?;
    Ok(Json(ApiResponse::success(confirmation)))
}

/// List the caller's own orders
#[utoipa::path(
    get,
    path = "/api/v1/orders/mine",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
        ("status" = Option<String>, Query, description = "Filter by order status"),
    ),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderResponse>>),
    ),
    security(("Bearer" = []))
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let (items, total) = state
        .services
        .orders
        .list_user_orders(
            auth_user.user_id,
            query.status,
            query.page,
            query.limit,
        )
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items,
        total,
        query.page,
        query.limit,
    ))))
}

/// Fetch one order with its line items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(id, auth_user.user_id, auth_user.is_admin())
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Admin: list all orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
        ("status" = Option<String>, Query, description = "Filter by order status"),
        ("user_id" = Option<Uuid>, Query, description = "Filter by user"),
    ),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let (items, total) = state
        .services
        .orders
        .list_orders_admin(query.status, query.user_id, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items,
        total,
        query.page,
        query.limit,
    ))))
}

/// Admin: transition an order's status
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Invalid status or transition", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    payload.validate()?;
    state
        .services
        .order_status
        .update_status(id, &payload.status)
        .await?;
    let order = state
        .services
        .orders
        .get_order(id, auth_user.user_id, true)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
