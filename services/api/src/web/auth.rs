//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, logout and the current user.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use profiler_core::{
    accounting::UNLIMITED_BALANCE,
    domain::{User, UserRole},
    ports::PortError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::middleware::{cookie_value, AUTH_COOKIE};
use crate::web::state::AppState;

const SESSION_DAYS: i64 = 30;
const MIN_PASSWORD_LEN: usize = 8;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
    /// `user` or `admin`.
    pub role: String,
    pub token_balance: i64,
}

impl From<&User> for AuthResponse {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email.clone(),
            role: user.role.as_str().to_string(),
            token_balance: user.token_balance,
        }
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ApiError::BadRequest("A valid email address is required".to_string())),
    }
}

/// Creates the auth session row and the matching cookie.
async fn start_session(state: &AppState, user_id: Uuid) -> Result<String, ApiError> {
    let auth_session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(SESSION_DAYS);
    state
        .db
        .create_auth_session(&auth_session_id, user_id, expires_at)
        .await?;

    Ok(format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        AUTH_COOKIE,
        auth_session_id,
        Duration::days(SESSION_DAYS).num_seconds()
    ))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new user account
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created successfully", body = AuthResponse),
        (status = 400, description = "Invalid request or email already registered"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email)?;
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    match state.db.get_user_by_email(&email).await {
        Ok(_) => {
            return Err(ApiError::BadRequest(
                "An account with this email already exists".to_string(),
            ))
        }
        Err(PortError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    // 1. Hash the password
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            ApiError::Internal("Failed to hash password".to_string())
        })?
        .to_string();

    // 2. Create user in database; configured admin emails start unlimited
    let (role, initial_balance) = if state.config.is_admin_email(&email) {
        (UserRole::Admin, UNLIMITED_BALANCE)
    } else {
        (UserRole::User, 0)
    };
    let user = state
        .db
        .create_user_with_email(&email, &password_hash, role, initial_balance)
        .await?;
    info!("Created {} account {}", user.role.as_str(), user.user_id);

    // 3. Start the session
    let cookie = start_session(&state, user.user_id).await?;

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse::from(&user)),
    ))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();

    // 1. Get user by email
    let user_creds = match state.db.get_user_by_email(&email).await {
        Ok(creds) => creds,
        Err(PortError::NotFound(_)) => return Err(ApiError::InvalidCredentials),
        Err(e) => return Err(e.into()),
    };

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&user_creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        ApiError::Internal("Authentication error".to_string())
    })?;
    if Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(ApiError::InvalidCredentials);
    }

    let user = state
        .db
        .get_user_by_id(user_creds.user_id)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    // 3. Start the session
    let cookie = start_session(&state, user.user_id).await?;

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse::from(&user)),
    ))
}

/// POST /auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let auth_session_id = cookie_value(&headers, AUTH_COOKIE).ok_or(ApiError::AuthRequired)?;

    state.db.delete_auth_session(&auth_session_id).await?;

    let cookie = format!(
        "{}=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0",
        AUTH_COOKIE
    );
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)]))
}

/// GET /auth/me - The signed-in user
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "The current user", body = AuthResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn me_handler(Extension(user): Extension<User>) -> Json<AuthResponse> {
    Json(AuthResponse::from(&user))
}
