// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Extension, Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api::auth::{AuthConfig, AuthService};
use storefront_api::config::AppConfig;
use storefront_api::db;
use storefront_api::entities::{address, cart_item, product, user};
use storefront_api::errors::ServiceError;
use storefront_api::events::{event_channel, process_events};
use storefront_api::handlers::AppServices;
use storefront_api::services::payments::{PaymentGateway, RemoteOrder};
use storefront_api::{api_v1_routes, AppState};

pub const TEST_GATEWAY_SECRET: &str = "test_gateway_secret";
pub const TEST_GATEWAY_KEY_ID: &str = "rzp_test_key";

/// In-process stand-in for the payment provider. Hands out sequential
/// order references and can be flipped into a failure mode.
pub struct FakeGateway {
    counter: AtomicU64,
    fail: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_remote_order(
        &self,
        amount_minor: i64,
        currency: &str,
        _receipt: &str,
    ) -> Result<RemoteOrder, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError(
                "payment gateway temporarily unavailable".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteOrder {
            order_ref: format!("order_test_{}", n),
            amount_minor,
            currency: currency.to_string(),
        })
    }
}

/// Application harness over an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    auth_service: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway_key_id = TEST_GATEWAY_KEY_ID.to_string();
        cfg.gateway_key_secret = TEST_GATEWAY_SECRET.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_sender, event_rx) = event_channel(256);
        let event_task = tokio::spawn(process_events(event_rx));

        let auth_service = Arc::new(AuthService::new(AuthConfig {
            jwt_secret: cfg.jwt_secret.clone(),
            token_expiration_secs: 3600,
            issuer: cfg.auth_issuer.clone(),
            audience: cfg.auth_audience.clone(),
        }));

        let gateway = Arc::new(FakeGateway::new());
        let services = AppServices::with_gateway(
            db_arc.clone(),
            event_sender.clone(),
            &cfg,
            gateway.clone(),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", api_v1_routes())
            .layer(Extension(auth_service.clone()))
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            auth_service,
            _event_task: event_task,
        }
    }

    /// Mints a bearer token for the given user.
    pub fn token_for(&self, user: &user::Model, roles: &[&str]) -> String {
        self.auth_service
            .generate_token(
                user.id,
                &user.name,
                &user.email,
                roles.iter().map(|r| r.to_string()).collect(),
            )
            .expect("mint test token")
    }

    /// Computes the signature the gateway would attach to a successful
    /// checkout callback.
    pub fn sign(&self, order_ref: &str, payment_ref: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(TEST_GATEWAY_SECRET.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(format!("{}|{}", order_ref, payment_ref).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize json body"))
        } else {
            Body::empty()
        };
        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_user(&self, name: &str, email: &str) -> user::Model {
        self.seed_user_with_status(name, email, "active").await
    }

    pub async fn seed_user_with_status(
        &self,
        name: &str,
        email: &str,
        status: &str,
    ) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(email.to_string()),
            phone: Set(None),
            status: Set(status.to_string()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed user")
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        discount_percent: Decimal,
        stock: i32,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            image: Set(None),
            price: Set(price),
            discount_percent: Set(discount_percent),
            stock: Set(stock),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product")
    }

    pub async fn seed_address(&self, user_id: Uuid) -> address::Model {
        address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            recipient: Set("Test Recipient".to_string()),
            address_line: Set("42 Test Street".to_string()),
            city: Set("Pune".to_string()),
            state: Set("MH".to_string()),
            pincode: Set("411001".to_string()),
            mobile: Set("9999999999".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed address")
    }

    pub async fn seed_cart_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> cart_item::Model {
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            created_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed cart item")
    }
}

/// Reads a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
