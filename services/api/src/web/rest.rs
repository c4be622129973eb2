//! services/api/src/web/rest.rs
//!
//! The master definition for the OpenAPI specification, plus the health check.

use crate::web::{analysis, auth, documents, payments, tokens};
use axum::Json;
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        analysis::analyze_handler,
        analysis::create_report_handler,
        analysis::list_analyses_handler,
        analysis::get_analysis_handler,
        analysis::get_report_for_analysis_handler,
        analysis::get_report_handler,
        documents::upload_document_handler,
        documents::list_documents_handler,
        documents::get_document_handler,
        tokens::token_status_handler,
        tokens::token_history_handler,
        payments::list_packages_handler,
        payments::create_intent_handler,
        payments::confirm_payment_handler,
        payments::webhook_handler,
    ),
    components(
        schemas(
            HealthResponse,
            auth::SignupRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            analysis::AnalyzeRequest,
            analysis::AnalyzeResponse,
            analysis::ReportRequest,
            analysis::ReportResponse,
            analysis::AnalysisRecordResponse,
            analysis::StoredReportResponse,
            documents::UploadResponse,
            documents::DocumentSummary,
            documents::DocumentResponse,
            tokens::TokenStatusResponse,
            tokens::UsageEntry,
            payments::PackageResponse,
            payments::CreateIntentRequest,
            payments::CreateIntentResponse,
            payments::ConfirmRequest,
            payments::ConfirmResponse,
            payments::WebhookAck,
        )
    ),
    tags(
        (name = "Cognitive Profiler API", description = "Text analysis, reports, token accounting and purchases.")
    )
)]
pub struct ApiDoc;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
