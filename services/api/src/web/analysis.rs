//! services/api/src/web/analysis.rs
//!
//! Short-form analyses and comprehensive reports.
//!
//! Both routes run behind `check_token_limits`, so by the time a handler runs
//! the caller is known to afford the estimated cost. The actual charge is the
//! input estimate plus the tokens of what the provider really returned.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use profiler_core::{
    accounting::estimate_tokens,
    domain::{
        AnalysisRequest, AnalysisType, CognitiveAnalysis, ComprehensiveReport, Identity, Provider,
        ReportSections, UsageKind, User,
    },
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::{AppState, TokenEstimate};
use crate::web::tokens::charge;

/// Output tokens reserved by the limit check for each route.
pub const ANALYSIS_OUTPUT_BUDGET: i64 = 300;
pub const REPORT_OUTPUT_BUDGET: i64 = 500;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    pub text: String,
    /// `intelligence`, `originality` or `cognitive`.
    #[schema(value_type = String)]
    pub analysis_type: AnalysisType,
    /// `open_ai`, `anthropic`, `deep_seek`, `perplexity` or `heuristic`.
    #[schema(value_type = String)]
    pub provider: Provider,
}

#[derive(Serialize, ToSchema)]
pub struct AnalyzeResponse {
    /// Only stored for signed-in users.
    pub analysis_id: Option<Uuid>,
    #[schema(value_type = String)]
    pub analysis_type: AnalysisType,
    /// The provider that produced the result; `heuristic` after a fallback.
    #[schema(value_type = String)]
    pub provider: Provider,
    #[schema(value_type = Object)]
    pub result: CognitiveAnalysis,
    pub tokens_charged: i64,
    pub tokens_remaining: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct ReportRequest {
    pub text: String,
    #[schema(value_type = String)]
    pub provider: Provider,
}

#[derive(Serialize, ToSchema)]
pub struct ReportResponse {
    pub report_id: Option<Uuid>,
    pub analysis_id: Option<Uuid>,
    #[schema(value_type = String)]
    pub provider: Provider,
    #[schema(value_type = Object)]
    pub sections: ReportSections,
    pub tokens_charged: i64,
    pub tokens_remaining: i64,
}

#[derive(Serialize, ToSchema)]
pub struct AnalysisRecordResponse {
    pub id: Uuid,
    pub input_text: String,
    #[schema(value_type = String)]
    pub analysis_type: AnalysisType,
    #[schema(value_type = String)]
    pub provider: Provider,
    #[schema(value_type = Object)]
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AnalysisRequest> for AnalysisRecordResponse {
    fn from(request: AnalysisRequest) -> Self {
        Self {
            id: request.id,
            input_text: request.input_text,
            analysis_type: request.analysis_type,
            provider: request.provider,
            result: request.result,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct StoredReportResponse {
    pub id: Uuid,
    pub analysis_id: Uuid,
    #[schema(value_type = String)]
    pub provider: Provider,
    #[schema(value_type = Object)]
    pub sections: ReportSections,
    pub created_at: DateTime<Utc>,
}

impl From<ComprehensiveReport> for StoredReportResponse {
    fn from(report: ComprehensiveReport) -> Self {
        Self {
            id: report.id,
            analysis_id: report.analysis_request_id,
            provider: report.provider,
            sections: report.sections,
            created_at: report.created_at,
        }
    }
}

fn require_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.to_string()))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Scores a text with one rubric.
#[utoipa::path(
    post,
    path = "/api/analyze",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Normalized analysis", body = AnalyzeResponse),
        (status = 400, description = "Bad request"),
        (status = 402, description = "Token limit exceeded"),
        (status = 502, description = "Provider failed or returned an unusable response"),
        (status = 503, description = "Provider not configured")
    )
)]
pub async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Extension(estimate): Extension<TokenEstimate>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    require_text(&req.text)?;
    if req.analysis_type == AnalysisType::Comprehensive {
        return Err(ApiError::BadRequest(
            "Use /api/reports for comprehensive reports".to_string(),
        ));
    }
    let analyzer = state.analyzers.get(req.provider)?;

    let stored = match identity.user() {
        Some(user) => Some(
            state
                .db
                .create_analysis_request(user.user_id, &req.text, req.analysis_type, req.provider)
                .await?,
        ),
        None => None,
    };

    let outcome = analyzer.analyze(&req.text, req.analysis_type).await?;
    if outcome.provider != req.provider {
        warn!("{} analysis answered by {}", req.provider, outcome.provider);
    }

    let cost = estimate.input_tokens + estimate_tokens(&outcome.raw_output);
    let debit = charge(
        &state,
        &identity,
        cost as f64,
        UsageKind::Analysis,
        &format!("{} analysis via {}", req.analysis_type.as_str(), outcome.provider),
    )
    .await?;

    if let Some(request) = &stored {
        state
            .db
            .update_analysis_result(
                request.id,
                request.user_id,
                outcome.provider,
                &to_json(&outcome.value)?,
            )
            .await?;
    }
    info!(
        "Completed {} analysis for {:?} ({} tokens)",
        req.analysis_type.as_str(),
        identity.actor(),
        debit.tokens_charged
    );

    Ok(Json(AnalyzeResponse {
        analysis_id: stored.map(|r| r.id),
        analysis_type: req.analysis_type,
        provider: outcome.provider,
        result: outcome.value,
        tokens_charged: debit.tokens_charged,
        tokens_remaining: debit.tokens_remaining,
    }))
}

/// Produces the ten-section comprehensive report.
#[utoipa::path(
    post,
    path = "/api/reports",
    request_body = ReportRequest,
    responses(
        (status = 200, description = "Fully populated report", body = ReportResponse),
        (status = 400, description = "Bad request"),
        (status = 402, description = "Token limit exceeded"),
        (status = 502, description = "Provider failed"),
        (status = 503, description = "Provider not configured")
    )
)]
pub async fn create_report_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Extension(estimate): Extension<TokenEstimate>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ReportResponse>, ApiError> {
    require_text(&req.text)?;
    let analyzer = state.analyzers.get(req.provider)?;

    let stored = match identity.user() {
        Some(user) => Some(
            state
                .db
                .create_analysis_request(
                    user.user_id,
                    &req.text,
                    AnalysisType::Comprehensive,
                    req.provider,
                )
                .await?,
        ),
        None => None,
    };

    let outcome = analyzer.comprehensive_report(&req.text).await?;

    let cost = estimate.input_tokens + estimate_tokens(&outcome.raw_output);
    let debit = charge(
        &state,
        &identity,
        cost as f64,
        UsageKind::Analysis,
        &format!("comprehensive report via {}", outcome.provider),
    )
    .await?;

    let report = match &stored {
        Some(request) => {
            state
                .db
                .update_analysis_result(
                    request.id,
                    request.user_id,
                    outcome.provider,
                    &to_json(&outcome.value)?,
                )
                .await?;
            Some(
                state
                    .db
                    .create_report(request.id, request.user_id, outcome.provider, &outcome.value)
                    .await?,
            )
        }
        None => None,
    };

    Ok(Json(ReportResponse {
        report_id: report.map(|r| r.id),
        analysis_id: stored.map(|r| r.id),
        provider: outcome.provider,
        sections: outcome.value,
        tokens_charged: debit.tokens_charged,
        tokens_remaining: debit.tokens_remaining,
    }))
}

#[utoipa::path(
    get,
    path = "/api/analyses",
    responses(
        (status = 200, description = "The caller's analyses, newest first", body = [AnalysisRecordResponse]),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn list_analyses_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<AnalysisRecordResponse>>, ApiError> {
    let requests = state.db.list_analysis_requests(user.user_id).await?;
    Ok(Json(
        requests
            .into_iter()
            .map(AnalysisRecordResponse::from)
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/analyses/{id}",
    params(("id" = Uuid, Path, description = "Analysis id")),
    responses(
        (status = 200, description = "The analysis", body = AnalysisRecordResponse),
        (status = 404, description = "Not found or not owned by the caller")
    )
)]
pub async fn get_analysis_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnalysisRecordResponse>, ApiError> {
    let request = state
        .db
        .get_analysis_request(id, user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Analysis".to_string()))?;
    Ok(Json(request.into()))
}

#[utoipa::path(
    get,
    path = "/api/analyses/{id}/report",
    params(("id" = Uuid, Path, description = "Analysis id")),
    responses(
        (status = 200, description = "The report produced for this analysis", body = StoredReportResponse),
        (status = 404, description = "Not found or not owned by the caller")
    )
)]
pub async fn get_report_for_analysis_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<StoredReportResponse>, ApiError> {
    let report = state
        .db
        .get_report_for_request(id, user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Report".to_string()))?;
    Ok(Json(report.into()))
}

#[utoipa::path(
    get,
    path = "/api/reports/{id}",
    params(("id" = Uuid, Path, description = "Report id")),
    responses(
        (status = 200, description = "The report", body = StoredReportResponse),
        (status = 404, description = "Not found or not owned by the caller")
    )
)]
pub async fn get_report_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<StoredReportResponse>, ApiError> {
    let report = state
        .db
        .get_report(id, user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Report".to_string()))?;
    Ok(Json(report.into()))
}
