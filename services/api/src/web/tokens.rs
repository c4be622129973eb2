//! services/api/src/web/tokens.rs
//!
//! Balance and ledger endpoints, plus the debit helper shared by every
//! handler that spends tokens.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use profiler_core::{
    accounting::{DebitOutcome, TokenStatus},
    domain::{Identity, TokenUsageRecord, UsageKind, User},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

/// Debits whoever the request acts as.
pub(crate) async fn charge(
    state: &AppState,
    identity: &Identity,
    amount: f64,
    kind: UsageKind,
    description: &str,
) -> Result<DebitOutcome, ApiError> {
    let outcome = match identity {
        Identity::User(user) => {
            state
                .accountant
                .deduct_registered_user_tokens(user.user_id, amount, kind, description)
                .await?
        }
        Identity::Anonymous(session) => {
            state
                .accountant
                .deduct_free_user_tokens(&session.session_id, amount, kind, description)
                .await?
        }
    };
    Ok(outcome)
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct TokenStatusResponse {
    /// `registered` or `free`.
    pub tier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlimited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifetime_limit: Option<i64>,
}

impl From<TokenStatus> for TokenStatusResponse {
    fn from(status: TokenStatus) -> Self {
        match status {
            TokenStatus::Registered { balance, unlimited } => Self {
                tier: "registered".to_string(),
                balance: Some(balance),
                unlimited: Some(unlimited),
                tokens_used: None,
                tokens_remaining: None,
                lifetime_limit: None,
            },
            TokenStatus::Free {
                tokens_used,
                tokens_remaining,
                lifetime_limit,
            } => Self {
                tier: "free".to_string(),
                balance: None,
                unlimited: None,
                tokens_used: Some(tokens_used),
                tokens_remaining: Some(tokens_remaining),
                lifetime_limit: Some(lifetime_limit),
            },
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Rows to return, newest first (default 50, max 200).
    pub limit: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct UsageEntry {
    pub id: Uuid,
    /// `analysis`, `upload` or `purchase`.
    pub kind: String,
    /// Negative for purchases.
    pub tokens_used: i64,
    pub tokens_remaining: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<TokenUsageRecord> for UsageEntry {
    fn from(record: TokenUsageRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind.as_str().to_string(),
            tokens_used: record.tokens_used,
            tokens_remaining: record.tokens_remaining,
            description: record.description,
            created_at: record.created_at,
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Balance for a signed-in user, remaining free allowance for anyone else.
#[utoipa::path(
    get,
    path = "/api/tokens/status",
    responses(
        (status = 200, description = "Current token status", body = TokenStatusResponse)
    )
)]
pub async fn token_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<TokenStatusResponse>, ApiError> {
    let status = state.accountant.token_status(&identity).await?;
    Ok(Json(TokenStatusResponse::from(status)))
}

#[utoipa::path(
    get,
    path = "/api/tokens/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Ledger rows, newest first", body = [UsageEntry]),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn token_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<UsageEntry>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let rows = state.accountant.usage_history(user.user_id, limit).await?;
    Ok(Json(rows.into_iter().map(UsageEntry::from).collect()))
}
