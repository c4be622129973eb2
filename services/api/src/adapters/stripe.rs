//! services/api/src/adapters/stripe.rs
//!
//! This module contains the payment processor adapter for Stripe.
//! It implements the `PaymentProcessor` port from the `core` crate: intents are
//! created and read over the REST API, webhooks are checked against the
//! `Stripe-Signature` header before anything in them is trusted.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use profiler_core::ports::{
    ChargeIntent, IntentMetadata, IntentStatus, PaymentProcessor, PortError, PortResult,
    WebhookEvent,
};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

const API_BASE: &str = "https://api.stripe.com/v1";

/// Deliveries signed further than this from "now" are rejected as replays.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct StripeAdapter {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
}

impl StripeAdapter {
    pub fn new(http: reqwest::Client, secret_key: String, webhook_secret: String) -> Self {
        Self {
            http,
            secret_key,
            webhook_secret,
        }
    }

    async fn read_intent(&self, response: reqwest::Response) -> PortResult<ChargeIntent> {
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PortError::Provider(format!(
                "stripe returned {}: {}",
                status, detail
            )));
        }
        let intent: StripeIntent = response
            .json()
            .await
            .map_err(|e| PortError::InvalidResponse(format!("stripe: {}", e)))?;
        Ok(intent.into_domain())
    }
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Deserialize)]
struct StripeIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    amount: i64,
    currency: String,
    status: String,
}

impl StripeIntent {
    fn into_domain(self) -> ChargeIntent {
        ChargeIntent {
            status: intent_status(&self.status),
            id: self.id,
            client_secret: self.client_secret,
            amount_cents: self.amount,
            currency: self.currency,
        }
    }
}

#[derive(Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Deserialize)]
struct StripeEventObject {
    #[serde(default)]
    id: Option<String>,
}

fn intent_status(raw: &str) -> IntentStatus {
    match raw {
        "succeeded" => IntentStatus::Succeeded,
        "canceled" => IntentStatus::Canceled,
        _ => IntentStatus::Pending,
    }
}

//=========================================================================================
// Webhook Signatures
//=========================================================================================

/// Checks a `t=<unix>,v1=<hex>[,v1=<hex>...]` header against `payload` at time `now`.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
) -> PortResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(PortError::Unauthorized)?;
    if signatures.is_empty() {
        return Err(PortError::Unauthorized);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        warn!("Webhook timestamp {} is outside the tolerance window", timestamp);
        return Err(PortError::Unauthorized);
    }

    let mut signed_payload = format!("{}.", timestamp).into_bytes();
    signed_payload.extend_from_slice(payload);

    for signature in &signatures {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        mac.update(&signed_payload);
        if mac.verify_slice(signature).is_ok() {
            return Ok(());
        }
    }
    Err(PortError::Unauthorized)
}

/// Decodes a verified payload into the events the bridge acts on.
pub fn parse_event(payload: &[u8]) -> PortResult<WebhookEvent> {
    let event: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| PortError::InvalidResponse(format!("webhook payload: {}", e)))?;
    let intent_id = || {
        event.data.object.id.clone().ok_or_else(|| {
            PortError::InvalidResponse(format!("{} event without an object id", event.event_type))
        })
    };
    match event.event_type.as_str() {
        "payment_intent.succeeded" => Ok(WebhookEvent::PaymentSucceeded {
            intent_id: intent_id()?,
        }),
        "payment_intent.payment_failed" | "payment_intent.canceled" => {
            Ok(WebhookEvent::PaymentFailed {
                intent_id: intent_id()?,
            })
        }
        _ => Ok(WebhookEvent::Ignored {
            event_type: event.event_type,
        }),
    }
}

//=========================================================================================
// `PaymentProcessor` Trait Implementation
//=========================================================================================

#[async_trait]
impl PaymentProcessor for StripeAdapter {
    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> PortResult<ChargeIntent> {
        let form = [
            ("amount", amount_cents.to_string()),
            ("currency", currency.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[user_id]", metadata.user_id.to_string()),
            ("metadata[tokens]", metadata.tokens.to_string()),
        ];
        debug!("Creating stripe intent for {} {}", amount_cents, currency);
        let response = self
            .http
            .post(format!("{}/payment_intents", API_BASE))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| PortError::Provider(format!("stripe: {}", e)))?;
        self.read_intent(response).await
    }

    async fn retrieve_intent(&self, intent_id: &str) -> PortResult<ChargeIntent> {
        let response = self
            .http
            .get(format!("{}/payment_intents/{}", API_BASE, intent_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| PortError::Provider(format!("stripe: {}", e)))?;
        self.read_intent(response).await
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> PortResult<WebhookEvent> {
        verify_signature(
            &self.webhook_secret,
            payload,
            signature_header,
            Utc::now().timestamp(),
        )?;
        parse_event(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    fn sign(payload: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_is_accepted() {
        let payload = br#"{"type":"ping","data":{"object":{}}}"#;
        let header = sign(payload, 1_700_000_000);
        assert!(verify_signature(SECRET, payload, &header, 1_700_000_100).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = sign(b"original", 1_700_000_000);
        assert!(matches!(
            verify_signature(SECRET, b"tampered", &header, 1_700_000_000),
            Err(PortError::Unauthorized)
        ));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let header = sign(b"body", 1_700_000_000);
        let later = 1_700_000_000 + SIGNATURE_TOLERANCE_SECS + 1;
        assert!(verify_signature(SECRET, b"body", &header, later).is_err());
    }

    #[test]
    fn header_without_signature_is_rejected() {
        assert!(verify_signature(SECRET, b"body", "t=1700000000", 1_700_000_000).is_err());
        assert!(verify_signature(SECRET, b"body", "garbage", 1_700_000_000).is_err());
    }

    #[test]
    fn events_are_mapped_by_type() {
        let succeeded = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;
        assert_eq!(
            parse_event(succeeded).unwrap(),
            WebhookEvent::PaymentSucceeded {
                intent_id: "pi_1".to_string()
            }
        );

        let failed = br#"{"type":"payment_intent.payment_failed","data":{"object":{"id":"pi_2"}}}"#;
        assert_eq!(
            parse_event(failed).unwrap(),
            WebhookEvent::PaymentFailed {
                intent_id: "pi_2".to_string()
            }
        );

        let other = br#"{"type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#;
        assert!(matches!(parse_event(other).unwrap(), WebhookEvent::Ignored { .. }));
    }

    #[test]
    fn unknown_statuses_count_as_pending() {
        assert_eq!(intent_status("succeeded"), IntentStatus::Succeeded);
        assert_eq!(intent_status("requires_payment_method"), IntentStatus::Pending);
        assert_eq!(intent_status("canceled"), IntentStatus::Canceled);
    }
}
