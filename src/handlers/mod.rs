use std::sync::Arc;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::services::orders::{CheckoutSettings, OrderService};
use crate::services::order_status::OrderStatusService;
use crate::services::payments::{HttpPaymentGateway, PaymentGateway};

pub mod orders;

/// Service container shared through [`crate::AppState`].
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
}

impl AppServices {
    pub fn new(
        db: Arc<sea_orm::DatabaseConnection>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpPaymentGateway::new(
            config.gateway_base_url.clone(),
            config.gateway_key_id.clone(),
            config.gateway_key_secret.clone(),
            std::time::Duration::from_secs(config.gateway_timeout_secs),
        )?);
        Ok(Self::with_gateway(db, event_sender, config, gateway))
    }

    /// Wire-up with an injected gateway; tests substitute a fake here.
    pub fn with_gateway(
        db: Arc<sea_orm::DatabaseConnection>,
        event_sender: EventSender,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let settings = CheckoutSettings {
            gateway_key_id: config.gateway_key_id.clone(),
            gateway_key_secret: config.gateway_key_secret.clone(),
            currency: config.currency.clone(),
            min_online_amount: config.min_online_amount,
        };
        Self {
            orders: Arc::new(OrderService::new(
                db.clone(),
                event_sender.clone(),
                gateway,
                settings,
            )),
            order_status: Arc::new(OrderStatusService::new(db, event_sender)),
        }
    }
}
