//! services/api/src/web/documents.rs
//!
//! Document upload and retrieval. Uploads are priced per hundred words;
//! signed-in users keep their documents, anonymous sessions get the extracted
//! text back without it being stored.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use profiler_core::{
    accounting::{calculate_registered_upload_cost, calculate_upload_cost, count_words},
    domain::{Document, Identity, UsageKind, User},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;
use crate::web::tokens::charge;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    /// `None` for anonymous uploads, which are not stored.
    pub document_id: Option<Uuid>,
    pub title: String,
    pub content: String,
    pub word_count: i64,
    pub tokens_charged: i64,
    pub tokens_remaining: i64,
}

#[derive(Serialize, ToSchema)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub title: String,
    pub word_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub word_count: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            title: doc.title,
            content: doc.content,
            word_count: doc.word_count,
            created_at: doc.created_at,
        }
    }
}

/// Reads the `file` part (and an optional `title` part) of the upload.
async fn read_upload(multipart: &mut Multipart) -> Result<(String, String), ApiError> {
    let mut title: Option<String> = None;
    let mut file: Option<(String, String)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        error!("Failed to read multipart data: {}", e);
        ApiError::BadRequest(format!("Failed to read multipart data: {}", e))
    })? {
        let part = field.name().map(str::to_string);
        match part.as_deref() {
            Some("title") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read title: {}", e)))?;
                title = Some(text.trim().to_string()).filter(|t| !t.is_empty());
            }
            Some("file") => {
                let name = field.file_name().unwrap_or("untitled.txt").to_string();
                let data = field.bytes().await.map_err(|e| {
                    ApiError::BadRequest(format!("Failed to read file bytes: {}", e))
                })?;
                let text = String::from_utf8(data.to_vec()).map_err(|e| {
                    ApiError::BadRequest(format!("Uploaded file is not valid UTF-8 text: {}", e))
                })?;
                file = Some((name, text));
            }
            _ => {}
        }
    }

    let (file_name, text) = file.ok_or_else(|| {
        ApiError::BadRequest("Multipart form must include a file part".to_string())
    })?;
    if text.trim().is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }
    Ok((title.unwrap_or(file_name), text))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Upload a plain-text document.
///
/// Accepts a multipart/form-data request with a `file` part and an optional
/// `title` part.
#[utoipa::path(
    post,
    path = "/api/documents",
    request_body(content_type = "multipart/form-data", description = "The document to upload."),
    responses(
        (status = 201, description = "Document accepted", body = UploadResponse),
        (status = 400, description = "Bad request (e.g., missing or non-text file)"),
        (status = 402, description = "Not enough tokens to pay for the upload"),
        (status = 403, description = "Free allowance used up")
    )
)]
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let (title, content) = read_upload(&mut multipart).await?;
    let word_count = count_words(&content);

    let cost = match &identity {
        Identity::User(user) => {
            let cost = calculate_registered_upload_cost(word_count);
            let decision = state
                .accountant
                .check_registered_user_tokens(user.user_id, cost)
                .await?;
            if !decision.can_proceed {
                return Err(ApiError::TokenLimit(decision.message.unwrap_or_else(|| {
                    "Insufficient token balance".to_string()
                })));
            }
            cost
        }
        Identity::Anonymous(session) => {
            let cost = calculate_upload_cost(word_count);
            let decision = state
                .accountant
                .check_free_user_limits(&session.session_id, cost, 0)
                .await?;
            if !decision.can_proceed {
                return Err(ApiError::TokenLimit(decision.message.unwrap_or_else(|| {
                    "Free token limit reached".to_string()
                })));
            }
            cost
        }
    };

    let debit = charge(
        &state,
        &identity,
        cost as f64,
        UsageKind::Upload,
        &format!("Upload of '{}' ({} words)", title, word_count),
    )
    .await?;

    let document_id = match identity.user() {
        Some(user) => Some(
            state
                .db
                .create_document(user.user_id, &title, &content, word_count)
                .await?
                .id,
        ),
        None => None,
    };
    info!(
        "Accepted upload '{}' ({} words, {} tokens) for {:?}",
        title,
        word_count,
        debit.tokens_charged,
        identity.actor()
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            document_id,
            title,
            content,
            word_count,
            tokens_charged: debit.tokens_charged,
            tokens_remaining: debit.tokens_remaining,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/documents",
    responses(
        (status = 200, description = "The caller's documents, newest first", body = [DocumentSummary]),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<DocumentSummary>>, ApiError> {
    let documents = state.db.list_documents(user.user_id).await?;
    Ok(Json(
        documents
            .into_iter()
            .map(|doc| DocumentSummary {
                id: doc.id,
                title: doc.title,
                word_count: doc.word_count,
                created_at: doc.created_at,
            })
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/documents/{id}",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "The document", body = DocumentResponse),
        (status = 404, description = "Not found or not owned by the caller")
    )
)]
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = state
        .db
        .get_document(id, user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Document".to_string()))?;
    Ok(Json(document.into()))
}
