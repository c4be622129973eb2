//! services/api/src/web/payments.rs
//!
//! Token purchases. Prices come from the package catalogue only; tokens are
//! credited once the processor confirms the charge, either through the
//! client's confirm call or the signed webhook, whichever lands first.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Extension, Json,
};
use profiler_core::{
    domain::{PaymentStatus, User},
    payments::{find_package, PaymentBridge, TokenPackage, TOKEN_PACKAGES},
    ports::{PortError, WebhookEvent},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::web::state::AppState;

const SIGNATURE_HEADER: &str = "stripe-signature";

fn bridge(state: &AppState) -> Result<&PaymentBridge, ApiError> {
    state.payments.as_ref().ok_or_else(|| {
        ApiError::Port(PortError::NotConfigured(
            "payments are not configured".to_string(),
        ))
    })
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct PackageResponse {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub tokens: i64,
}

impl From<TokenPackage> for PackageResponse {
    fn from(package: TokenPackage) -> Self {
        Self {
            id: package.id.to_string(),
            name: package.name.to_string(),
            price_cents: package.price_cents,
            tokens: package.tokens,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateIntentRequest {
    pub package_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct CreateIntentResponse {
    pub intent_id: String,
    pub client_secret: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub tokens: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct ConfirmRequest {
    pub intent_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct ConfirmResponse {
    pub intent_id: String,
    /// `pending`, `succeeded` or `failed`.
    pub status: String,
    pub token_balance: i64,
}

#[derive(Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

//=========================================================================================
// Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/payments/packages",
    responses(
        (status = 200, description = "Purchasable token packages", body = [PackageResponse])
    )
)]
pub async fn list_packages_handler() -> Json<Vec<PackageResponse>> {
    Json(TOKEN_PACKAGES.into_iter().map(PackageResponse::from).collect())
}

#[utoipa::path(
    post,
    path = "/api/payments/intent",
    request_body = CreateIntentRequest,
    responses(
        (status = 200, description = "Intent created; the payment is pending", body = CreateIntentResponse),
        (status = 400, description = "Unknown package"),
        (status = 401, description = "Not signed in"),
        (status = 503, description = "Payments not configured")
    )
)]
pub async fn create_intent_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, ApiError> {
    let bridge = bridge(&state)?;
    let package = find_package(&req.package_id).ok_or_else(|| {
        ApiError::BadRequest(format!("Unknown token package '{}'", req.package_id))
    })?;

    let intent = bridge
        .create_charge_intent(package.price_cents, package.tokens, user.user_id)
        .await?;

    Ok(Json(CreateIntentResponse {
        intent_id: intent.id,
        client_secret: intent.client_secret,
        amount_cents: intent.amount_cents,
        currency: intent.currency,
        tokens: package.tokens,
    }))
}

#[utoipa::path(
    post,
    path = "/api/payments/confirm",
    request_body = ConfirmRequest,
    responses(
        (status = 200, description = "Current payment status after re-checking the processor", body = ConfirmResponse),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "No such payment for this user")
    )
)]
pub async fn confirm_payment_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let bridge = bridge(&state)?;

    // Users may only confirm their own intents.
    match state.db.get_payment_by_intent(&req.intent_id).await? {
        Some(payment) if payment.user_id == user.user_id => {}
        _ => return Err(ApiError::NotFound("Payment".to_string())),
    }

    let status = bridge.handle_confirmed_charge(&req.intent_id).await;
    if status == PaymentStatus::Failed {
        warn!("Confirmation of intent {} failed", req.intent_id);
    }

    let token_balance = state
        .db
        .get_user_by_id(user.user_id)
        .await?
        .map(|u| u.token_balance)
        .unwrap_or(user.token_balance);

    Ok(Json(ConfirmResponse {
        intent_id: req.intent_id,
        status: status.as_str().to_string(),
        token_balance,
    }))
}

/// Processor webhook; authenticated by its signature header only.
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body(content_type = "application/json", description = "Raw processor event."),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Missing signature header"),
        (status = 401, description = "Signature did not verify")
    )
)]
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let bridge = bridge(&state)?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {} header", SIGNATURE_HEADER)))?;

    let event = bridge.handle_webhook(&body, signature).await?;
    if let WebhookEvent::PaymentSucceeded { intent_id } = &event {
        info!("Webhook settled intent {}", intent_id);
    }
    Ok(Json(WebhookAck { received: true }))
}
