//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use profiler_core::domain::{
    Actor, AnalysisRequest, AnalysisType, AnonymousSession, ComprehensiveReport, Document,
    Payment, PaymentStatus, Provider, ReportSections, TokenUsageRecord, UsageKind, User,
    UserCredentials, UserRole,
};
use profiler_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> PortResult<T> {
    value.parse::<T>().map_err(PortError::Unexpected)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: String,
    token_balance: i64,
    is_registered: bool,
    role: String,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            user_id: self.user_id,
            email: self.email,
            token_balance: self.token_balance,
            is_registered: self.is_registered,
            role: parse_column::<UserRole>(&self.role)?,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
}

#[derive(FromRow)]
struct AnonymousSessionRecord {
    session_id: String,
    tokens_used: i64,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}
impl AnonymousSessionRecord {
    fn to_domain(self) -> AnonymousSession {
        AnonymousSession {
            session_id: self.session_id,
            tokens_used: self.tokens_used,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
        }
    }
}

#[derive(FromRow)]
struct UsageRecord {
    id: Uuid,
    user_id: Option<Uuid>,
    session_id: Option<String>,
    kind: String,
    tokens_used: i64,
    tokens_remaining: i64,
    description: String,
    created_at: DateTime<Utc>,
}
impl UsageRecord {
    fn to_domain(self) -> PortResult<TokenUsageRecord> {
        let actor = match (self.user_id, self.session_id) {
            (Some(user_id), None) => Actor::User(user_id),
            (None, Some(session_id)) => Actor::Session(session_id),
            _ => {
                return Err(PortError::Unexpected(format!(
                    "Ledger row {} does not have exactly one actor",
                    self.id
                )))
            }
        };
        Ok(TokenUsageRecord {
            id: self.id,
            actor,
            kind: parse_column::<UsageKind>(&self.kind)?,
            tokens_used: self.tokens_used,
            tokens_remaining: self.tokens_remaining,
            description: self.description,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct DocumentRecord {
    id: Uuid,
    user_id: Uuid,
    title: String,
    content: String,
    word_count: i64,
    created_at: DateTime<Utc>,
}
impl DocumentRecord {
    fn to_domain(self) -> Document {
        Document {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            content: self.content,
            word_count: self.word_count,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct AnalysisRequestRecord {
    id: Uuid,
    user_id: Uuid,
    input_text: String,
    analysis_type: String,
    provider: String,
    result: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl AnalysisRequestRecord {
    fn to_domain(self) -> PortResult<AnalysisRequest> {
        Ok(AnalysisRequest {
            id: self.id,
            user_id: self.user_id,
            input_text: self.input_text,
            analysis_type: parse_column::<AnalysisType>(&self.analysis_type)?,
            provider: parse_column::<Provider>(&self.provider)?,
            result: self.result,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ReportRecord {
    id: Uuid,
    analysis_request_id: Uuid,
    user_id: Uuid,
    provider: String,
    intelligence: String,
    abstract_thinking: String,
    originality: String,
    reasoning_style: String,
    ambiguity_handling: String,
    metacognition: String,
    thinking_type: String,
    cognitive_complexity: String,
    thinking_quality: String,
    archetype: String,
    created_at: DateTime<Utc>,
}
impl ReportRecord {
    fn to_domain(self) -> PortResult<ComprehensiveReport> {
        Ok(ComprehensiveReport {
            id: self.id,
            analysis_request_id: self.analysis_request_id,
            user_id: self.user_id,
            provider: parse_column::<Provider>(&self.provider)?,
            sections: ReportSections {
                intelligence: self.intelligence,
                abstract_thinking: self.abstract_thinking,
                originality: self.originality,
                reasoning_style: self.reasoning_style,
                ambiguity_handling: self.ambiguity_handling,
                metacognition: self.metacognition,
                thinking_type: self.thinking_type,
                cognitive_complexity: self.cognitive_complexity,
                thinking_quality: self.thinking_quality,
                archetype: self.archetype,
            },
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct PaymentRecord {
    id: Uuid,
    user_id: Uuid,
    intent_id: String,
    amount_cents: i64,
    currency: String,
    tokens_purchased: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl PaymentRecord {
    fn to_domain(self) -> PortResult<Payment> {
        Ok(Payment {
            id: self.id,
            user_id: self.user_id,
            intent_id: self.intent_id,
            amount_cents: self.amount_cents,
            currency: self.currency,
            tokens_purchased: self.tokens_purchased,
            status: parse_column::<PaymentStatus>(&self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const USER_COLUMNS: &str = "user_id, email, token_balance, is_registered, role, created_at";
const SESSION_COLUMNS: &str =
    "session_id, tokens_used, ip_address, user_agent, created_at, last_activity_at";
const USAGE_COLUMNS: &str =
    "id, user_id, session_id, kind, tokens_used, tokens_remaining, description, created_at";
const DOCUMENT_COLUMNS: &str = "id, user_id, title, content, word_count, created_at";
const ANALYSIS_COLUMNS: &str =
    "id, user_id, input_text, analysis_type, provider, result, created_at, updated_at";
const REPORT_COLUMNS: &str = "id, analysis_request_id, user_id, provider, intelligence, abstract_thinking, \
     originality, reasoning_style, ambiguity_handling, metacognition, thinking_type, \
     cognitive_complexity, thinking_quality, archetype, created_at";
const PAYMENT_COLUMNS: &str = "id, user_id, intent_id, amount_cents, currency, tokens_purchased, status, created_at, updated_at";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        role: UserRole,
        initial_balance: i64,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "INSERT INTO users (user_id, email, hashed_password, token_balance, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .bind(initial_balance)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE user_id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(UserRecord::to_domain).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", email)),
            _ => PortError::Unexpected(e.to_string()),
        })?;
        Ok(UserCredentials {
            user_id: record.user_id,
            email: record.email,
            hashed_password: record.hashed_password,
        })
    }

    async fn compare_and_set_balance(
        &self,
        user_id: Uuid,
        expected: i64,
        new_balance: i64,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET token_balance = $3 WHERE user_id = $1 AND token_balance = $2",
        )
        .bind(user_id)
        .bind(expected)
        .bind(new_balance)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        user_id.ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_anonymous_session(
        &self,
        session_id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> PortResult<AnonymousSession> {
        let record = sqlx::query_as::<_, AnonymousSessionRecord>(&format!(
            "INSERT INTO anonymous_sessions (session_id, ip_address, user_agent) \
             VALUES ($1, $2, $3) RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(ip_address)
        .bind(user_agent)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_anonymous_session(
        &self,
        session_id: &str,
    ) -> PortResult<Option<AnonymousSession>> {
        let record = sqlx::query_as::<_, AnonymousSessionRecord>(&format!(
            "SELECT {} FROM anonymous_sessions WHERE session_id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(AnonymousSessionRecord::to_domain))
    }

    async fn touch_anonymous_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("UPDATE anonymous_sessions SET last_activity_at = NOW() WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn compare_and_set_session_usage(
        &self,
        session_id: &str,
        expected: i64,
        new_usage: i64,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE anonymous_sessions SET tokens_used = $3, last_activity_at = NOW() \
             WHERE session_id = $1 AND tokens_used = $2",
        )
        .bind(session_id)
        .bind(expected)
        .bind(new_usage)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn append_usage_record(&self, record: TokenUsageRecord) -> PortResult<()> {
        let (user_id, session_id) = match record.actor {
            Actor::User(user_id) => (Some(user_id), None),
            Actor::Session(session_id) => (None, Some(session_id)),
        };
        sqlx::query(
            "INSERT INTO token_usage (id, user_id, session_id, kind, tokens_used, tokens_remaining, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(user_id)
        .bind(session_id)
        .bind(record.kind.as_str())
        .bind(record.tokens_used)
        .bind(record.tokens_remaining)
        .bind(record.description)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_usage_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> PortResult<Vec<TokenUsageRecord>> {
        let records = sqlx::query_as::<_, UsageRecord>(&format!(
            "SELECT {} FROM token_usage WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
            USAGE_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(UsageRecord::to_domain).collect()
    }

    async fn get_usage_for_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> PortResult<Vec<TokenUsageRecord>> {
        let records = sqlx::query_as::<_, UsageRecord>(&format!(
            "SELECT {} FROM token_usage WHERE session_id = $1 ORDER BY created_at DESC LIMIT $2",
            USAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(UsageRecord::to_domain).collect()
    }

    async fn create_document(
        &self,
        user_id: Uuid,
        title: &str,
        content: &str,
        word_count: i64,
    ) -> PortResult<Document> {
        let record = sqlx::query_as::<_, DocumentRecord>(&format!(
            "INSERT INTO documents (id, user_id, title, content, word_count) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            DOCUMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(title)
        .bind(content)
        .bind(word_count)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_document(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<Document>> {
        let record = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM documents WHERE id = $1 AND user_id = $2",
            DOCUMENT_COLUMNS
        ))
        .bind(document_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(DocumentRecord::to_domain))
    }

    async fn list_documents(&self, user_id: Uuid) -> PortResult<Vec<Document>> {
        let records = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM documents WHERE user_id = $1 ORDER BY created_at DESC",
            DOCUMENT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(DocumentRecord::to_domain).collect())
    }

    async fn create_analysis_request(
        &self,
        user_id: Uuid,
        input_text: &str,
        analysis_type: AnalysisType,
        provider: Provider,
    ) -> PortResult<AnalysisRequest> {
        let record = sqlx::query_as::<_, AnalysisRequestRecord>(&format!(
            "INSERT INTO analysis_requests (id, user_id, input_text, analysis_type, provider) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            ANALYSIS_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(input_text)
        .bind(analysis_type.as_str())
        .bind(provider.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn update_analysis_result(
        &self,
        request_id: Uuid,
        user_id: Uuid,
        provider: Provider,
        result: &serde_json::Value,
    ) -> PortResult<()> {
        let updated = sqlx::query(
            "UPDATE analysis_requests SET result = $3, provider = $4, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(request_id)
        .bind(user_id)
        .bind(result)
        .bind(provider.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if updated.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Analysis request {} not found",
                request_id
            )));
        }
        Ok(())
    }

    async fn get_analysis_request(
        &self,
        request_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<AnalysisRequest>> {
        let record = sqlx::query_as::<_, AnalysisRequestRecord>(&format!(
            "SELECT {} FROM analysis_requests WHERE id = $1 AND user_id = $2",
            ANALYSIS_COLUMNS
        ))
        .bind(request_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(AnalysisRequestRecord::to_domain).transpose()
    }

    async fn list_analysis_requests(&self, user_id: Uuid) -> PortResult<Vec<AnalysisRequest>> {
        let records = sqlx::query_as::<_, AnalysisRequestRecord>(&format!(
            "SELECT {} FROM analysis_requests WHERE user_id = $1 ORDER BY created_at DESC",
            ANALYSIS_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records
            .into_iter()
            .map(AnalysisRequestRecord::to_domain)
            .collect()
    }

    async fn create_report(
        &self,
        analysis_request_id: Uuid,
        user_id: Uuid,
        provider: Provider,
        sections: &ReportSections,
    ) -> PortResult<ComprehensiveReport> {
        let record = sqlx::query_as::<_, ReportRecord>(&format!(
            "INSERT INTO comprehensive_reports (id, analysis_request_id, user_id, provider, \
             intelligence, abstract_thinking, originality, reasoning_style, ambiguity_handling, \
             metacognition, thinking_type, cognitive_complexity, thinking_quality, archetype) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) RETURNING {}",
            REPORT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(analysis_request_id)
        .bind(user_id)
        .bind(provider.as_str())
        .bind(&sections.intelligence)
        .bind(&sections.abstract_thinking)
        .bind(&sections.originality)
        .bind(&sections.reasoning_style)
        .bind(&sections.ambiguity_handling)
        .bind(&sections.metacognition)
        .bind(&sections.thinking_type)
        .bind(&sections.cognitive_complexity)
        .bind(&sections.thinking_quality)
        .bind(&sections.archetype)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_report(
        &self,
        report_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<ComprehensiveReport>> {
        let record = sqlx::query_as::<_, ReportRecord>(&format!(
            "SELECT {} FROM comprehensive_reports WHERE id = $1 AND user_id = $2",
            REPORT_COLUMNS
        ))
        .bind(report_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(ReportRecord::to_domain).transpose()
    }

    async fn get_report_for_request(
        &self,
        analysis_request_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<ComprehensiveReport>> {
        let record = sqlx::query_as::<_, ReportRecord>(&format!(
            "SELECT {} FROM comprehensive_reports WHERE analysis_request_id = $1 AND user_id = $2 \
             ORDER BY created_at DESC LIMIT 1",
            REPORT_COLUMNS
        ))
        .bind(analysis_request_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(ReportRecord::to_domain).transpose()
    }

    async fn create_payment(
        &self,
        user_id: Uuid,
        intent_id: &str,
        amount_cents: i64,
        currency: &str,
        tokens_purchased: i64,
    ) -> PortResult<Payment> {
        let record = sqlx::query_as::<_, PaymentRecord>(&format!(
            "INSERT INTO payments (id, user_id, intent_id, amount_cents, currency, tokens_purchased) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(intent_id)
        .bind(amount_cents)
        .bind(currency)
        .bind(tokens_purchased)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_payment_by_intent(&self, intent_id: &str) -> PortResult<Option<Payment>> {
        let record = sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payments WHERE intent_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(PaymentRecord::to_domain).transpose()
    }

    async fn update_payment_status(
        &self,
        intent_id: &str,
        status: PaymentStatus,
    ) -> PortResult<bool> {
        let updated = sqlx::query(
            "UPDATE payments SET status = $2, updated_at = NOW() \
             WHERE intent_id = $1 AND status <> 'succeeded'",
        )
        .bind(intent_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if updated.rows_affected() == 1 {
            return Ok(true);
        }

        // Nothing changed: either the payment is already settled or it does not exist.
        let exists: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM payments WHERE intent_id = $1")
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(PortError::NotFound(format!(
                "Payment for intent {} not found",
                intent_id
            ))),
        }
    }
}
