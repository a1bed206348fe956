use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, instrument, warn};

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Order registered with the payment provider ahead of client-side checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteOrder {
    /// Provider-assigned order reference, later echoed in the signature.
    pub order_ref: String,
    /// Amount in minor units (paise for INR).
    pub amount_minor: i64,
    pub currency: String,
}

/// Payment provider seam. The production implementation talks to the
/// provider's REST API; tests substitute a fake.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_remote_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<RemoteOrder, ServiceError>;
}

/// Verifies a checkout callback signature: HMAC-SHA256 over
/// `"{order_ref}|{payment_ref}"`, hex-encoded by the provider. The
/// comparison runs in constant time; callers must never echo the
/// expected digest back to the client.
pub fn verify_signature(
    secret: &str,
    order_ref: &str,
    payment_ref: &str,
    supplied_signature: &str,
) -> bool {
    let supplied = match hex::decode(supplied_signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(order_ref.as_bytes());
    mac.update(b"|");
    mac.update(payment_ref.as_bytes());
    mac.verify_slice(&supplied).is_ok()
}

/// Converts a major-unit decimal amount to minor units (x100), rejecting
/// anything that is not a whole number of minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let minor = (amount * Decimal::from(100)).round_dp(0);
    if minor != amount * Decimal::from(100) {
        return Err(ServiceError::ValidationError(
            "amount has sub-minor-unit precision".to_string(),
        ));
    }
    minor
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError("amount out of range".to_string()))
}

#[derive(Debug, Deserialize)]
struct GatewayOrderBody {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: Option<GatewayErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetail {
    description: Option<String>,
}

/// HTTP client for the Razorpay-compatible orders API.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: String,
        key_id: String,
        key_secret: String,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            key_id,
            key_secret,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), fields(receipt = %receipt))]
    async fn create_remote_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<RemoteOrder, ServiceError> {
        let url = format!("{}/v1/orders", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "amount": amount_minor,
            "currency": currency,
            "receipt": receipt,
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!("payment gateway timed out");
                    ServiceError::GatewayError("payment gateway temporarily unavailable".into())
                } else {
                    error!("payment gateway request failed: {}", e);
                    ServiceError::GatewayError("payment gateway request failed".into())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<GatewayErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .and_then(|e| e.description)
                .unwrap_or_else(|| format!("gateway returned {}", status));
            warn!(%status, "payment gateway rejected order creation");
            return Err(ServiceError::GatewayError(detail));
        }

        let remote: GatewayOrderBody = response
            .json()
            .await
            .map_err(|_| ServiceError::GatewayError("unreadable gateway response".into()))?;

        Ok(RemoteOrder {
            order_ref: remote.id,
            amount_minor: remote.amount,
            currency: remote.currency,
        })
    }
}
