//! Stripe Checkout client.
//!
//! Creates and retrieves Checkout Sessions over the form-encoded REST API and verifies
//! webhook signatures (`Stripe-Signature: t=<unix>,v1=<hex>`).

use crate::config::StripeConfig;
use crate::services::fiscal::amount_in_cents;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Lifetime of a checkout session.
const SESSION_EXPIRY_SECS: i64 = 30 * 60;

const PRODUCT_NAME: &str = "Reserva de Área Común";

pub const METADATA_RESERVATION_ID: &str = "reservaId";
pub const METADATA_PAYMENT_ID: &str = "pagoId";

#[derive(Debug, Error)]
pub enum StripeError {
    #[error("Stripe credentials not configured")]
    NotConfigured,
    #[error("Stripe API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Stripe request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected Stripe payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(&'static str),
}

impl From<StripeError> for AppError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::NotConfigured => AppError::ServiceUnavailable,
            StripeError::InvalidSignature(_) => AppError::BadRequest(anyhow::Error::new(err)),
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

/// Checkout Session as returned by Stripe (only the fields this service reads).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub payment_intent: Option<String>,
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn reservation_id(&self) -> Option<i64> {
        self.metadata
            .get(METADATA_RESERVATION_ID)
            .and_then(|v| v.parse().ok())
    }

    pub fn payment_id(&self) -> Option<i64> {
        self.metadata
            .get(METADATA_PAYMENT_ID)
            .and_then(|v| v.parse().ok())
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }
}

/// What to charge for.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub reservation_id: i64,
    pub payment_id: i64,
    pub amount: Decimal,
    pub description: String,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
    pub created: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn checkout_session(&self) -> Result<CheckoutSession, StripeError> {
        Ok(serde_json::from_value(self.data.object.clone())?)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    /// Form fields of a one-item payment session.
    fn checkout_form(&self, request: &CheckoutRequest, now: i64) -> Vec<(String, String)> {
        let frontend = self.config.frontend_url.trim_end_matches('/');
        let mut form = vec![
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("mode".to_string(), "payment".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                self.config.currency.clone(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                PRODUCT_NAME.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][description]".to_string(),
                request.description.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                amount_in_cents(request.amount).to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "success_url".to_string(),
                format!(
                    "{}/reserva-exitosa?session_id={{CHECKOUT_SESSION_ID}}",
                    frontend
                ),
            ),
            (
                "cancel_url".to_string(),
                format!("{}/areas-comunes?canceled=true", frontend),
            ),
            (
                "expires_at".to_string(),
                (now + SESSION_EXPIRY_SECS).to_string(),
            ),
            (
                format!("metadata[{}]", METADATA_RESERVATION_ID),
                request.reservation_id.to_string(),
            ),
            (
                format!("metadata[{}]", METADATA_PAYMENT_ID),
                request.payment_id.to_string(),
            ),
        ];
        if let Some(email) = request.customer_email.as_deref().filter(|e| !e.is_empty()) {
            form.push(("customer_email".to_string(), email.to_string()));
        }
        form
    }

    pub async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, StripeError> {
        if !self.is_configured() {
            return Err(StripeError::NotConfigured);
        }

        let form = self.checkout_form(request, chrono::Utc::now().timestamp());
        let body = serde_urlencoded::to_string(&form)
            .map_err(|e| StripeError::Api {
                status: 0,
                message: format!("Failed to encode checkout form: {}", e),
            })?;

        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await?;

        let session: CheckoutSession = Self::decode(response).await?;
        tracing::info!(
            session_id = %session.id,
            reservation_id = request.reservation_id,
            payment_id = request.payment_id,
            "Stripe checkout session created"
        );
        Ok(session)
    }

    pub async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, StripeError> {
        if !self.is_configured() {
            return Err(StripeError::NotConfigured);
        }

        let url = format!(
            "{}/v1/checkout/sessions/{}",
            self.config.api_base_url, session_id
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "Stripe API response");

        if status.is_success() {
            Ok(serde_json::from_str(&body)?)
        } else {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(body);
            tracing::error!(status = %status, message = %message, "Stripe request failed");
            Err(StripeError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Checks a `Stripe-Signature` header against the raw body at unix time `now`.
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> Result<(), StripeError> {
        let secret = self.config.webhook_secret.expose_secret();
        if secret.is_empty() {
            return Err(StripeError::NotConfigured);
        }

        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(StripeError::InvalidSignature("missing timestamp"))?;
        if candidates.is_empty() {
            return Err(StripeError::InvalidSignature("missing v1 signature"));
        }
        if now.abs_diff(timestamp) > self.config.webhook_tolerance_secs.unsigned_abs() {
            return Err(StripeError::InvalidSignature("timestamp outside tolerance"));
        }

        let expected = compute_signature(secret, timestamp, payload)?;
        let matched = candidates
            .iter()
            .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));

        if matched {
            Ok(())
        } else {
            tracing::warn!("Webhook signature verification failed");
            Err(StripeError::InvalidSignature("signature mismatch"))
        }
    }

    pub fn parse_webhook_event(&self, payload: &[u8]) -> Result<WebhookEvent, StripeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Hex HMAC-SHA256 over `"{timestamp}.{payload}"`.
fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, StripeError> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| StripeError::InvalidSignature("invalid key length"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `Stripe-Signature` header value for a payload, as Stripe would send it.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let signature = compute_signature(secret, timestamp, payload).unwrap_or_default();
    format!("t={},v1={}", timestamp, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    const WEBHOOK_SECRET: &str = "whsec_test";

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: Secret::new("sk_test_123".to_string()),
            webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
            api_base_url: "https://api.stripe.com".to_string(),
            frontend_url: "http://localhost:5173/".to_string(),
            currency: "usd".to_string(),
            webhook_tolerance_secs: 300,
        }
    }

    #[test]
    fn test_is_configured() {
        assert!(StripeClient::new(test_config()).is_configured());

        let mut config = test_config();
        config.secret_key = Secret::new(String::new());
        assert!(!StripeClient::new(config).is_configured());
    }

    #[test]
    fn valid_signature_is_accepted() {
        let client = StripeClient::new(test_config());
        let payload = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let header = signature_header(WEBHOOK_SECRET, 1_700_000_000, payload);

        assert!(client
            .verify_webhook_signature(payload, &header, 1_700_000_100)
            .is_ok());
    }

    #[test]
    fn any_matching_v1_entry_is_enough() {
        let client = StripeClient::new(test_config());
        let payload = b"{}";
        let valid = signature_header(WEBHOOK_SECRET, 1_700_000_000, payload);
        let header = format!("{},v1=deadbeef", valid.replacen("v1=", "v1=00,v1=", 1));

        assert!(client
            .verify_webhook_signature(payload, &header, 1_700_000_000)
            .is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let client = StripeClient::new(test_config());
        let header = signature_header(WEBHOOK_SECRET, 1_700_000_000, br#"{"amount":100}"#);

        assert!(matches!(
            client.verify_webhook_signature(br#"{"amount":1}"#, &header, 1_700_000_000),
            Err(StripeError::InvalidSignature("signature mismatch"))
        ));
    }

    #[test]
    fn extreme_timestamps_are_outside_tolerance() {
        let client = StripeClient::new(test_config());
        for timestamp in [i64::MIN, i64::MAX, -1] {
            let header = format!("t={},v1=00", timestamp);
            assert!(matches!(
                client.verify_webhook_signature(b"{}", &header, 1_700_000_000),
                Err(StripeError::InvalidSignature("timestamp outside tolerance"))
            ));
        }
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let client = StripeClient::new(test_config());
        let payload = b"{}";
        let header = signature_header(WEBHOOK_SECRET, 1_700_000_000, payload);

        assert!(matches!(
            client.verify_webhook_signature(payload, &header, 1_700_000_301),
            Err(StripeError::InvalidSignature("timestamp outside tolerance"))
        ));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let client = StripeClient::new(test_config());
        for header in ["", "v1=abc", "t=1700000000", "t=abc,v1=abc"] {
            assert!(client
                .verify_webhook_signature(b"{}", header, 1_700_000_000)
                .is_err());
        }
    }

    #[test]
    fn checkout_form_carries_amount_urls_and_metadata() {
        let client = StripeClient::new(test_config());
        let request = CheckoutRequest {
            reservation_id: 7,
            payment_id: 12,
            amount: Decimal::new(10050, 2),
            description: "Reserva de Piscina".to_string(),
            customer_email: Some("ana@example.com".to_string()),
        };
        let form: HashMap<String, String> =
            client.checkout_form(&request, 1_000).into_iter().collect();

        assert_eq!(form["line_items[0][price_data][unit_amount]"], "10050");
        assert_eq!(form["line_items[0][price_data][currency]"], "usd");
        assert_eq!(form["mode"], "payment");
        assert_eq!(form["expires_at"], "2800");
        assert_eq!(form["metadata[reservaId]"], "7");
        assert_eq!(form["metadata[pagoId]"], "12");
        assert_eq!(form["customer_email"], "ana@example.com");
        assert_eq!(
            form["success_url"],
            "http://localhost:5173/reserva-exitosa?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(
            form["cancel_url"],
            "http://localhost:5173/areas-comunes?canceled=true"
        );
    }

    #[test]
    fn session_metadata_ids_parse() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_test_1",
            "payment_status": "paid",
            "metadata": {"reservaId": "7", "pagoId": "12"}
        }))
        .unwrap();

        assert_eq!(session.reservation_id(), Some(7));
        assert_eq!(session.payment_id(), Some(12));
        assert!(session.is_paid());
    }
}
