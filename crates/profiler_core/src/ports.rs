//! crates/profiler_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    AnalysisRequest, AnalysisType, AnonymousSession, ComprehensiveReport, Document, Payment,
    PaymentStatus, Provider, ReportSections, TokenUsageRecord, User, UserCredentials, UserRole,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Service not configured: {0}")]
    NotConfigured(String),
    #[error("Provider call failed: {0}")]
    Provider(String),
    #[error("Provider returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence Gateway
//=========================================================================================

/// CRUD over every stored entity.
///
/// Owner-scoped reads take both the entity id and the owner id and return `None`
/// when the pair does not match; that pairing is the only per-user isolation.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Users ---
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        role: UserRole,
        initial_balance: i64,
    ) -> PortResult<User>;

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    /// Writes `new_balance` only if the stored balance still equals `expected`.
    /// Returns whether the write happened.
    async fn compare_and_set_balance(
        &self,
        user_id: Uuid,
        expected: i64,
        new_balance: i64,
    ) -> PortResult<bool>;

    // --- Auth Sessions ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Anonymous Sessions ---
    async fn create_anonymous_session(
        &self,
        session_id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> PortResult<AnonymousSession>;

    async fn get_anonymous_session(&self, session_id: &str)
        -> PortResult<Option<AnonymousSession>>;

    async fn touch_anonymous_session(&self, session_id: &str) -> PortResult<()>;

    /// Same contract as `compare_and_set_balance`, over a session's cumulative usage.
    async fn compare_and_set_session_usage(
        &self,
        session_id: &str,
        expected: i64,
        new_usage: i64,
    ) -> PortResult<bool>;

    // --- Token Ledger ---
    async fn append_usage_record(&self, record: TokenUsageRecord) -> PortResult<()>;

    /// Newest first.
    async fn get_usage_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> PortResult<Vec<TokenUsageRecord>>;

    /// Newest first.
    async fn get_usage_for_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> PortResult<Vec<TokenUsageRecord>>;

    // --- Documents ---
    async fn create_document(
        &self,
        user_id: Uuid,
        title: &str,
        content: &str,
        word_count: i64,
    ) -> PortResult<Document>;

    async fn get_document(&self, document_id: Uuid, user_id: Uuid)
        -> PortResult<Option<Document>>;

    async fn list_documents(&self, user_id: Uuid) -> PortResult<Vec<Document>>;

    // --- Analysis Requests ---
    async fn create_analysis_request(
        &self,
        user_id: Uuid,
        input_text: &str,
        analysis_type: AnalysisType,
        provider: Provider,
    ) -> PortResult<AnalysisRequest>;

    async fn update_analysis_result(
        &self,
        request_id: Uuid,
        user_id: Uuid,
        provider: Provider,
        result: &serde_json::Value,
    ) -> PortResult<()>;

    async fn get_analysis_request(
        &self,
        request_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<AnalysisRequest>>;

    async fn list_analysis_requests(&self, user_id: Uuid) -> PortResult<Vec<AnalysisRequest>>;

    // --- Comprehensive Reports ---
    async fn create_report(
        &self,
        analysis_request_id: Uuid,
        user_id: Uuid,
        provider: Provider,
        sections: &ReportSections,
    ) -> PortResult<ComprehensiveReport>;

    async fn get_report(
        &self,
        report_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<ComprehensiveReport>>;

    async fn get_report_for_request(
        &self,
        analysis_request_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<ComprehensiveReport>>;

    // --- Payments ---
    async fn create_payment(
        &self,
        user_id: Uuid,
        intent_id: &str,
        amount_cents: i64,
        currency: &str,
        tokens_purchased: i64,
    ) -> PortResult<Payment>;

    async fn get_payment_by_intent(&self, intent_id: &str) -> PortResult<Option<Payment>>;

    /// Moves a payment to `status` unless it has already `succeeded`, which is
    /// terminal. Returns whether the row changed; `NotFound` if there is no such
    /// payment.
    async fn update_payment_status(&self, intent_id: &str, status: PaymentStatus)
        -> PortResult<bool>;
}

//=========================================================================================
// Language Model Providers
//=========================================================================================

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// The vendor this binding talks to.
    fn provider(&self) -> Provider;

    /// Sends the rubric prompt plus the user's text and returns the raw model output.
    async fn complete(&self, system_prompt: &str, user_text: &str) -> PortResult<String>;
}

//=========================================================================================
// Payment Processor
//=========================================================================================

/// Processor-side state of a charge, reduced to what the bridge acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Succeeded,
    /// Still waiting on the customer or the processor.
    Pending,
    Canceled,
}

/// A processor's in-progress charge.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: IntentStatus,
}

/// Metadata attached to an intent so webhook deliveries can be traced back.
#[derive(Debug, Clone)]
pub struct IntentMetadata {
    pub user_id: Uuid,
    pub tokens: i64,
}

/// A webhook delivery after its signature has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentSucceeded { intent_id: String },
    PaymentFailed { intent_id: String },
    Ignored { event_type: String },
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> PortResult<ChargeIntent>;

    async fn retrieve_intent(&self, intent_id: &str) -> PortResult<ChargeIntent>;

    /// Verifies the signature header against the raw payload and decodes the event.
    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> PortResult<WebhookEvent>;
}
