pub mod analysis;
pub mod auth;
pub mod documents;
pub mod middleware;
pub mod payments;
pub mod rest;
pub mod state;
pub mod tokens;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use self::analysis::{ANALYSIS_OUTPUT_BUDGET, REPORT_OUTPUT_BUDGET};
use self::middleware::{
    check_token_limits, check_upload_permission, require_auth, resolve_identity, resolve_user,
};
use self::state::{AppState, OutputBudget};

pub use rest::ApiDoc;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Builds every API route with its guards. CORS and Swagger UI are added by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    // Public routes (no identity needed)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/api/payments/packages", get(payments::list_packages_handler))
        .route("/api/payments/webhook", post(payments::webhook_handler));

    // Signed-in users only; no anonymous session is created for these
    let user_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/api/analyses", get(analysis::list_analyses_handler))
        .route("/api/analyses/{id}", get(analysis::get_analysis_handler))
        .route(
            "/api/analyses/{id}/report",
            get(analysis::get_report_for_analysis_handler),
        )
        .route("/api/reports/{id}", get(analysis::get_report_handler))
        .route("/api/documents", get(documents::list_documents_handler))
        .route("/api/documents/{id}", get(documents::get_document_handler))
        .route("/api/tokens/history", get(tokens::token_history_handler))
        .route("/api/payments/intent", post(payments::create_intent_handler))
        .route("/api/payments/confirm", post(payments::confirm_payment_handler))
        .route_layer(axum_middleware::from_fn(require_auth))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            resolve_user,
        ));

    // Metered routes: the limit check runs before any provider is called
    let analyze_routes = Router::new()
        .route("/api/analyze", post(analysis::analyze_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            (state.clone(), OutputBudget(ANALYSIS_OUTPUT_BUDGET)),
            check_token_limits,
        ));
    let report_routes = Router::new()
        .route("/api/reports", post(analysis::create_report_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            (state.clone(), OutputBudget(REPORT_OUTPUT_BUDGET)),
            check_token_limits,
        ));
    let upload_routes = Router::new()
        .route("/api/documents", post(documents::upload_document_handler))
        .route_layer(axum_middleware::from_fn(check_upload_permission))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    // Anyone, signed in or anonymous
    let identity_routes = Router::new()
        .route("/api/tokens/status", get(tokens::token_status_handler))
        .merge(analyze_routes)
        .merge(report_routes)
        .merge(upload_routes)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            resolve_identity,
        ));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(identity_routes)
        .with_state(state)
}
