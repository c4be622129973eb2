//! services/api/src/web/middleware.rs
//!
//! Request guards: who is calling, whether they must be signed in, and whether
//! their token allowance covers the request before any provider is called.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Duration;
use profiler_core::{
    accounting::{can_user_upload_files, estimate_tokens, FREE_LIFETIME_TOKENS},
    domain::{Identity, User},
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::{AppState, OutputBudget, TokenEstimate};

pub const AUTH_COOKIE: &str = "session";
pub const ANON_COOKIE: &str = "anon_session";

/// JSON bodies guarded by `check_token_limits` are buffered up to this size.
const MAX_JSON_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Reads a single cookie value from the `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| {
            let (key, value) = c.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The first hop of `x-forwarded-for`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
}

/// The user behind a valid `session` cookie, if any.
async fn signed_in_user(state: &AppState, headers: &HeaderMap) -> Result<Option<User>, ApiError> {
    let Some(auth_session_id) = cookie_value(headers, AUTH_COOKIE) else {
        return Ok(None);
    };
    match state.db.validate_auth_session(&auth_session_id).await {
        Ok(user_id) => Ok(state.db.get_user_by_id(user_id).await?),
        Err(e) => {
            debug!("Ignoring auth session cookie: {}", e);
            Ok(None)
        }
    }
}

/// Resolves the caller to a signed-in user or an anonymous session and stores
/// the `Identity` in the request extensions.
///
/// A caller with neither a valid `session` nor a known `anon_session` cookie
/// gets a fresh anonymous session, returned to them as a `Set-Cookie`. Only
/// routes that serve anonymous callers are layered with this.
pub async fn resolve_identity(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(user) = signed_in_user(&state, req.headers()).await? {
        req.extensions_mut().insert(Identity::User(user));
        return Ok(next.run(req).await);
    }

    if let Some(anon_id) = cookie_value(req.headers(), ANON_COOKIE) {
        if let Some(session) = state.db.get_anonymous_session(&anon_id).await? {
            state.db.touch_anonymous_session(&anon_id).await?;
            req.extensions_mut().insert(Identity::Anonymous(session));
            return Ok(next.run(req).await);
        }
    }

    let session_id = Uuid::new_v4().to_string();
    let ip_address = client_ip(req.headers());
    let user_agent = header_str(req.headers(), header::USER_AGENT.as_str());
    let session = state
        .db
        .create_anonymous_session(&session_id, ip_address.as_deref(), user_agent.as_deref())
        .await?;
    info!("Created anonymous session {}", session_id);
    req.extensions_mut().insert(Identity::Anonymous(session));

    let mut response = next.run(req).await;
    let cookie = format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        ANON_COOKIE,
        session_id,
        Duration::days(365).num_seconds()
    );
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

/// Resolves only signed-in users; never creates an anonymous session. Used in
/// front of `require_auth` on routes anonymous callers cannot use.
pub async fn resolve_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(user) = signed_in_user(&state, req.headers()).await? {
        req.extensions_mut().insert(Identity::User(user));
    }
    Ok(next.run(req).await)
}

/// Rejects anonymous callers. Inserts the resolved `User` for the handler.
pub async fn require_auth(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let user = match req.extensions().get::<Identity>() {
        Some(Identity::User(user)) => user.clone(),
        _ => return Err(ApiError::AuthRequired),
    };
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Estimates the request's cost from the JSON `text` field plus the route's
/// output budget and refuses it before any provider is called.
pub async fn check_token_limits(
    State((state, budget)): State<(Arc<AppState>, OutputBudget)>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_JSON_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read request body: {}", e)))?;

    let payload: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("Request body is not valid JSON: {}", e)))?;
    let text = payload
        .get("text")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ApiError::BadRequest("Request body must include a text field".to_string()))?;

    let estimate = TokenEstimate {
        input_tokens: estimate_tokens(text),
        output_tokens: budget.0,
    };

    let identity = parts
        .extensions
        .get::<Identity>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("Identity was not resolved".to_string()))?;

    match &identity {
        Identity::User(user) => {
            let decision = state
                .accountant
                .check_registered_user_tokens(user.user_id, estimate.total())
                .await?;
            if !decision.can_proceed {
                return Err(ApiError::TokenLimit(decision.message.unwrap_or_else(|| {
                    "Insufficient token balance".to_string()
                })));
            }
        }
        Identity::Anonymous(session) => {
            let decision = state
                .accountant
                .check_free_user_limits(
                    &session.session_id,
                    estimate.input_tokens,
                    estimate.output_tokens,
                )
                .await?;
            if !decision.can_proceed {
                return Err(ApiError::TokenLimit(decision.message.unwrap_or_else(|| {
                    "Free token limit reached".to_string()
                })));
            }
        }
    }

    parts.extensions.insert(estimate);
    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}

/// Anonymous sessions may upload only while they have free tokens left.
pub async fn check_upload_permission(req: Request, next: Next) -> Result<Response, ApiError> {
    let identity = req
        .extensions()
        .get::<Identity>()
        .ok_or_else(|| ApiError::Internal("Identity was not resolved".to_string()))?;
    if !can_user_upload_files(identity) {
        warn!("Upload refused for {:?}", identity.actor());
        return Err(ApiError::UploadNotPermitted(format!(
            "The free allowance of {} tokens is used up. Create an account to upload documents.",
            FREE_LIFETIME_TOKENS
        )));
    }
    Ok(next.run(req).await)
}
