mod common;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;

use common::{body_json, TestApp, TEST_GATEWAY_KEY_ID};
use storefront_api::entities::{cart_item, order, product};

async fn place_online_order(
    app: &TestApp,
    token: &str,
    address_id: uuid::Uuid,
    product_id: uuid::Uuid,
    quantity: i32,
    total: &str,
) -> axum::response::Response {
    app.request(
        Method::POST,
        "/api/v1/orders/online-payment",
        Some(json!({
            "delivery_address_id": address_id,
            "items": [{ "product_id": product_id, "quantity": quantity }],
            "total": total,
        })),
        Some(token),
    )
    .await
}

#[tokio::test]
async fn online_checkout_defers_stock_and_cart() {
    let app = TestApp::new().await;
    let user = app.seed_user("Asha", "asha@example.com").await;
    let token = app.token_for(&user, &[]);
    let address = app.seed_address(user.id).await;
    let widget = app.seed_product("Widget", dec!(500), dec!(10), 10).await;
    app.seed_cart_item(user.id, widget.id, 1).await;

    let response = place_online_order(&app, &token, address.id, widget.id, 1, "450.00").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["amount_minor"], json!(45000));
    assert_eq!(body["data"]["currency"], json!("INR"));
    assert_eq!(body["data"]["key_id"], json!(TEST_GATEWAY_KEY_ID));
    assert_eq!(body["data"]["customer_email"], json!("asha@example.com"));
    assert!(body["data"]["gateway_order_ref"]
        .as_str()
        .unwrap()
        .starts_with("order_test_"));

    // Intent only: stock and cart untouched, order pending.
    let stored = product::Entity::find_by_id(widget.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.stock, 10);
    let cart_count = cart_item::Entity::find()
        .filter(cart_item::Column::UserId.eq(user.id))
        .count(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(cart_count, 1);
    let pending = order::Entity::find()
        .filter(order::Column::UserId.eq(user.id))
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, "PENDING_PAYMENT");
    assert_eq!(pending.payment_status, "pending");
    assert_eq!(pending.payment_method, "online");
}

#[tokio::test]
async fn valid_signature_settles_order_once() {
    let app = TestApp::new().await;
    let user = app.seed_user("Asha", "asha@example.com").await;
    let token = app.token_for(&user, &[]);
    let address = app.seed_address(user.id).await;
    let widget = app.seed_product("Widget", dec!(500), dec!(10), 10).await;
    app.seed_cart_item(user.id, widget.id, 1).await;

    let response = place_online_order(&app, &token, address.id, widget.id, 2, "900.00").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let order_ref = body["data"]["gateway_order_ref"].as_str().unwrap().to_string();

    let signature = app.sign(&order_ref, "pay_123");
    let verify = app
        .request(
            Method::POST,
            "/api/v1/orders/verify-payment",
            Some(json!({
                "gateway_order_ref": order_ref,
                "gateway_payment_ref": "pay_123",
                "signature": signature,
            })),
            Some(&token),
        )
        .await;
    assert_eq!(verify.status(), StatusCode::OK);
    let verify_body = body_json(verify).await;
    assert_eq!(verify_body["data"]["status"], json!("PROCESSING"));

    let settled = order::Entity::find()
        .filter(order::Column::UserId.eq(user.id))
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.payment_status, "paid");
    assert_eq!(settled.gateway_payment_ref.as_deref(), Some("pay_123"));
    assert!(settled.paid_at.is_some());
    assert!(settled.verified_at.is_some());

    let stored = product::Entity::find_by_id(widget.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.stock, 8);
    let cart_count = cart_item::Entity::find()
        .filter(cart_item::Column::UserId.eq(user.id))
        .count(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(cart_count, 0);

    // Replaying the same callback finds no pending order and must not
    // decrement stock again.
    let signature = app.sign(settled.gateway_order_ref.as_deref().unwrap(), "pay_123");
    let replay = app
        .request(
            Method::POST,
            "/api/v1/orders/verify-payment",
            Some(json!({
                "gateway_order_ref": settled.gateway_order_ref,
                "gateway_payment_ref": "pay_123",
                "signature": signature,
            })),
            Some(&token),
        )
        .await;
    assert_eq!(replay.status(), StatusCode::NOT_FOUND);
    let stored = product::Entity::find_by_id(widget.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.stock, 8);
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let app = TestApp::new().await;
    let user = app.seed_user("Asha", "asha@example.com").await;
    let token = app.token_for(&user, &[]);
    let address = app.seed_address(user.id).await;
    let widget = app.seed_product("Widget", dec!(500), dec!(0), 10).await;

    let response = place_online_order(&app, &token, address.id, widget.id, 1, "500.00").await;
    let body = body_json(response).await;
    let order_ref = body["data"]["gateway_order_ref"].as_str().unwrap().to_string();

    // Signature computed over a different payment reference.
    let signature = app.sign(&order_ref, "pay_other");
    let verify = app
        .request(
            Method::POST,
            "/api/v1/orders/verify-payment",
            Some(json!({
                "gateway_order_ref": order_ref,
                "gateway_payment_ref": "pay_123",
                "signature": signature,
            })),
            Some(&token),
        )
        .await;
    assert_eq!(verify.status(), StatusCode::BAD_REQUEST);

    // Order stays pending and no stock moved.
    let pending = order::Entity::find()
        .filter(order::Column::UserId.eq(user.id))
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, "PENDING_PAYMENT");
    let stored = product::Entity::find_by_id(widget.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.stock, 10);
}

#[tokio::test]
async fn verification_is_scoped_to_the_owning_user() {
    let app = TestApp::new().await;
    let asha = app.seed_user("Asha", "asha@example.com").await;
    let ravi = app.seed_user("Ravi", "ravi@example.com").await;
    let asha_token = app.token_for(&asha, &[]);
    let ravi_token = app.token_for(&ravi, &[]);
    let address = app.seed_address(asha.id).await;
    let widget = app.seed_product("Widget", dec!(500), dec!(0), 10).await;

    let response = place_online_order(&app, &asha_token, address.id, widget.id, 1, "500.00").await;
    let body = body_json(response).await;
    let order_ref = body["data"]["gateway_order_ref"].as_str().unwrap().to_string();

    // A valid signature presented by a different account must not settle.
    let signature = app.sign(&order_ref, "pay_123");
    let verify = app
        .request(
            Method::POST,
            "/api/v1/orders/verify-payment",
            Some(json!({
                "gateway_order_ref": order_ref,
                "gateway_payment_ref": "pay_123",
                "signature": signature,
            })),
            Some(&ravi_token),
        )
        .await;
    assert_eq!(verify.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dismissed_checkout_marks_payment_failed() {
    let app = TestApp::new().await;
    let user = app.seed_user("Asha", "asha@example.com").await;
    let token = app.token_for(&user, &[]);
    let address = app.seed_address(user.id).await;
    let widget = app.seed_product("Widget", dec!(500), dec!(0), 10).await;

    let response = place_online_order(&app, &token, address.id, widget.id, 1, "500.00").await;
    let body = body_json(response).await;
    let order_ref = body["data"]["gateway_order_ref"].as_str().unwrap().to_string();

    let failed = app
        .request(
            Method::POST,
            "/api/v1/orders/payment-failed",
            Some(json!({ "gateway_order_ref": order_ref })),
            Some(&token),
        )
        .await;
    assert_eq!(failed.status(), StatusCode::OK);
    let failed_body = body_json(failed).await;
    assert_eq!(failed_body["data"]["status"], json!("PAYMENT_FAILED"));

    // A late verification for the same reference no longer finds a pending order.
    let signature = app.sign(&order_ref, "pay_123");
    let verify = app
        .request(
            Method::POST,
            "/api/v1/orders/verify-payment",
            Some(json!({
                "gateway_order_ref": order_ref,
                "gateway_payment_ref": "pay_123",
                "signature": signature,
            })),
            Some(&token),
        )
        .await;
    assert_eq!(verify.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn settled_orders_cannot_be_marked_failed() {
    let app = TestApp::new().await;
    let user = app.seed_user("Asha", "asha@example.com").await;
    let token = app.token_for(&user, &[]);
    let address = app.seed_address(user.id).await;
    let widget = app.seed_product("Widget", dec!(500), dec!(0), 10).await;

    let response = place_online_order(&app, &token, address.id, widget.id, 1, "500.00").await;
    let body = body_json(response).await;
    let order_ref = body["data"]["gateway_order_ref"].as_str().unwrap().to_string();

    let signature = app.sign(&order_ref, "pay_123");
    let verify = app
        .request(
            Method::POST,
            "/api/v1/orders/verify-payment",
            Some(json!({
                "gateway_order_ref": order_ref,
                "gateway_payment_ref": "pay_123",
                "signature": signature,
            })),
            Some(&token),
        )
        .await;
    assert_eq!(verify.status(), StatusCode::OK);

    // The widget fires its dismiss handler independently of its success
    // handler; a late failed callback must match zero rows and leave the
    // settled order untouched.
    let failed = app
        .request(
            Method::POST,
            "/api/v1/orders/payment-failed",
            Some(json!({ "gateway_order_ref": order_ref })),
            Some(&token),
        )
        .await;
    assert_eq!(failed.status(), StatusCode::NOT_FOUND);

    let settled = order::Entity::find()
        .filter(order::Column::UserId.eq(user.id))
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, "PROCESSING");
    assert_eq!(settled.payment_status, "paid");
    let stored = product::Entity::find_by_id(widget.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.stock, 9);
}

#[tokio::test]
async fn online_orders_enforce_minimum_amount() {
    let app = TestApp::new().await;
    let user = app.seed_user("Asha", "asha@example.com").await;
    let token = app.token_for(&user, &[]);
    let address = app.seed_address(user.id).await;
    let trinket = app.seed_product("Trinket", dec!(50), dec!(0), 10).await;

    let response = place_online_order(&app, &token, address.id, trinket.id, 1, "50.00").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("minimum"));
}

#[tokio::test]
async fn gateway_failure_aborts_checkout() {
    let app = TestApp::new().await;
    let user = app.seed_user("Asha", "asha@example.com").await;
    let token = app.token_for(&user, &[]);
    let address = app.seed_address(user.id).await;
    let widget = app.seed_product("Widget", dec!(500), dec!(0), 10).await;

    app.gateway.fail_next_calls(true);
    let response = place_online_order(&app, &token, address.id, widget.id, 1, "500.00").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert!(!body["message"]
        .as_str()
        .unwrap()
        .contains(common::TEST_GATEWAY_SECRET));

    let order_count = order::Entity::find()
        .count(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(order_count, 0);
}
