//! services/api/src/adapters/memory.rs
//!
//! A non-persistent `DatabaseService` used when no `DATABASE_URL` is configured
//! and by the integration tests. Every table lives behind a single lock, so a
//! compare-and-set is atomic with respect to every other write.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use profiler_core::domain::{
    Actor, AnalysisRequest, AnalysisType, AnonymousSession, ComprehensiveReport, Document,
    Payment, PaymentStatus, Provider, ReportSections, TokenUsageRecord, User, UserCredentials,
    UserRole,
};
use profiler_core::ports::{DatabaseService, PortError, PortResult};
use tokio::sync::RwLock;
use uuid::Uuid;

struct StoredUser {
    user: User,
    hashed_password: String,
}

struct StoredAuthSession {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, StoredUser>,
    auth_sessions: HashMap<String, StoredAuthSession>,
    anonymous_sessions: HashMap<String, AnonymousSession>,
    // Append-only, oldest first.
    usage: Vec<TokenUsageRecord>,
    documents: Vec<Document>,
    analyses: Vec<AnalysisRequest>,
    reports: Vec<ComprehensiveReport>,
    payments: HashMap<String, Payment>,
}

#[derive(Clone, Default)]
pub struct MemoryAdapter {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T: Clone>(rows: impl DoubleEndedIterator<Item = T>, limit: i64) -> Vec<T> {
    rows.rev().take(limit.max(0) as usize).collect()
}

#[async_trait]
impl DatabaseService for MemoryAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        role: UserRole,
        initial_balance: i64,
    ) -> PortResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.user.email == email) {
            return Err(PortError::Unexpected(format!(
                "A user with email {} already exists",
                email
            )));
        }
        let user = User {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            token_balance: initial_balance,
            is_registered: true,
            role,
            created_at: Utc::now(),
        };
        tables.users.insert(
            user.user_id,
            StoredUser {
                user: user.clone(),
                hashed_password: hashed_password.to_string(),
            },
        );
        Ok(user)
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&user_id).map(|u| u.user.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let tables = self.tables.read().await;
        tables
            .users
            .values()
            .find(|u| u.user.email == email)
            .map(|u| UserCredentials {
                user_id: u.user.user_id,
                email: u.user.email.clone(),
                hashed_password: u.hashed_password.clone(),
            })
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn compare_and_set_balance(
        &self,
        user_id: Uuid,
        expected: i64,
        new_balance: i64,
    ) -> PortResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&user_id) {
            Some(stored) if stored.user.token_balance == expected => {
                stored.user.token_balance = new_balance;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PortError::NotFound(format!("User {} not found", user_id))),
        }
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        tables.auth_sessions.insert(
            session_id.to_string(),
            StoredAuthSession {
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let tables = self.tables.read().await;
        tables
            .auth_sessions
            .get(session_id)
            .filter(|s| s.expires_at > Utc::now())
            .map(|s| s.user_id)
            .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.tables.write().await.auth_sessions.remove(session_id);
        Ok(())
    }

    async fn create_anonymous_session(
        &self,
        session_id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> PortResult<AnonymousSession> {
        let now = Utc::now();
        let session = AnonymousSession {
            session_id: session_id.to_string(),
            tokens_used: 0,
            created_at: now,
            last_activity_at: now,
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
        };
        let mut tables = self.tables.write().await;
        tables
            .anonymous_sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn get_anonymous_session(
        &self,
        session_id: &str,
    ) -> PortResult<Option<AnonymousSession>> {
        let tables = self.tables.read().await;
        Ok(tables.anonymous_sessions.get(session_id).cloned())
    }

    async fn touch_anonymous_session(&self, session_id: &str) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(session) = tables.anonymous_sessions.get_mut(session_id) {
            session.last_activity_at = Utc::now();
        }
        Ok(())
    }

    async fn compare_and_set_session_usage(
        &self,
        session_id: &str,
        expected: i64,
        new_usage: i64,
    ) -> PortResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.anonymous_sessions.get_mut(session_id) {
            Some(session) if session.tokens_used == expected => {
                session.tokens_used = new_usage;
                session.last_activity_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PortError::NotFound(format!(
                "Anonymous session {} not found",
                session_id
            ))),
        }
    }

    async fn append_usage_record(&self, record: TokenUsageRecord) -> PortResult<()> {
        self.tables.write().await.usage.push(record);
        Ok(())
    }

    async fn get_usage_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> PortResult<Vec<TokenUsageRecord>> {
        let tables = self.tables.read().await;
        let rows = tables
            .usage
            .iter()
            .filter(|r| r.actor == Actor::User(user_id))
            .cloned()
            .collect::<Vec<_>>();
        Ok(newest_first(rows.into_iter(), limit))
    }

    async fn get_usage_for_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> PortResult<Vec<TokenUsageRecord>> {
        let tables = self.tables.read().await;
        let rows = tables
            .usage
            .iter()
            .filter(|r| matches!(&r.actor, Actor::Session(id) if id == session_id))
            .cloned()
            .collect::<Vec<_>>();
        Ok(newest_first(rows.into_iter(), limit))
    }

    async fn create_document(
        &self,
        user_id: Uuid,
        title: &str,
        content: &str,
        word_count: i64,
    ) -> PortResult<Document> {
        let document = Document {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            content: content.to_string(),
            word_count,
            created_at: Utc::now(),
        };
        self.tables.write().await.documents.push(document.clone());
        Ok(document)
    }

    async fn get_document(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<Document>> {
        let tables = self.tables.read().await;
        Ok(tables
            .documents
            .iter()
            .find(|d| d.id == document_id && d.user_id == user_id)
            .cloned())
    }

    async fn list_documents(&self, user_id: Uuid) -> PortResult<Vec<Document>> {
        let tables = self.tables.read().await;
        let rows = tables
            .documents
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        Ok(rows.into_iter().rev().collect())
    }

    async fn create_analysis_request(
        &self,
        user_id: Uuid,
        input_text: &str,
        analysis_type: AnalysisType,
        provider: Provider,
    ) -> PortResult<AnalysisRequest> {
        let now = Utc::now();
        let request = AnalysisRequest {
            id: Uuid::new_v4(),
            user_id,
            input_text: input_text.to_string(),
            analysis_type,
            provider,
            result: None,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.analyses.push(request.clone());
        Ok(request)
    }

    async fn update_analysis_result(
        &self,
        request_id: Uuid,
        user_id: Uuid,
        provider: Provider,
        result: &serde_json::Value,
    ) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        let request = tables
            .analyses
            .iter_mut()
            .find(|r| r.id == request_id && r.user_id == user_id)
            .ok_or_else(|| {
                PortError::NotFound(format!("Analysis request {} not found", request_id))
            })?;
        request.result = Some(result.clone());
        request.provider = provider;
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn get_analysis_request(
        &self,
        request_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<AnalysisRequest>> {
        let tables = self.tables.read().await;
        Ok(tables
            .analyses
            .iter()
            .find(|r| r.id == request_id && r.user_id == user_id)
            .cloned())
    }

    async fn list_analysis_requests(&self, user_id: Uuid) -> PortResult<Vec<AnalysisRequest>> {
        let tables = self.tables.read().await;
        let rows = tables
            .analyses
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        Ok(rows.into_iter().rev().collect())
    }

    async fn create_report(
        &self,
        analysis_request_id: Uuid,
        user_id: Uuid,
        provider: Provider,
        sections: &ReportSections,
    ) -> PortResult<ComprehensiveReport> {
        let report = ComprehensiveReport {
            id: Uuid::new_v4(),
            analysis_request_id,
            user_id,
            provider,
            sections: sections.clone(),
            created_at: Utc::now(),
        };
        self.tables.write().await.reports.push(report.clone());
        Ok(report)
    }

    async fn get_report(
        &self,
        report_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<ComprehensiveReport>> {
        let tables = self.tables.read().await;
        Ok(tables
            .reports
            .iter()
            .find(|r| r.id == report_id && r.user_id == user_id)
            .cloned())
    }

    async fn get_report_for_request(
        &self,
        analysis_request_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<ComprehensiveReport>> {
        let tables = self.tables.read().await;
        Ok(tables
            .reports
            .iter()
            .rev()
            .find(|r| r.analysis_request_id == analysis_request_id && r.user_id == user_id)
            .cloned())
    }

    async fn create_payment(
        &self,
        user_id: Uuid,
        intent_id: &str,
        amount_cents: i64,
        currency: &str,
        tokens_purchased: i64,
    ) -> PortResult<Payment> {
        let mut tables = self.tables.write().await;
        if tables.payments.contains_key(intent_id) {
            return Err(PortError::Unexpected(format!(
                "Payment for intent {} already exists",
                intent_id
            )));
        }
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id,
            intent_id: intent_id.to_string(),
            amount_cents,
            currency: currency.to_string(),
            tokens_purchased,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        tables
            .payments
            .insert(payment.intent_id.clone(), payment.clone());
        Ok(payment)
    }

    async fn get_payment_by_intent(&self, intent_id: &str) -> PortResult<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(intent_id).cloned())
    }

    async fn update_payment_status(
        &self,
        intent_id: &str,
        status: PaymentStatus,
    ) -> PortResult<bool> {
        let mut tables = self.tables.write().await;
        let payment = tables.payments.get_mut(intent_id).ok_or_else(|| {
            PortError::NotFound(format!("Payment for intent {} not found", intent_id))
        })?;
        if payment.status == PaymentStatus::Succeeded {
            return Ok(false);
        }
        payment.status = status;
        payment.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn compare_and_set_only_writes_on_match() {
        let db = MemoryAdapter::new();
        let user = db
            .create_user_with_email("a@example.com", "hash", UserRole::User, 100)
            .await
            .unwrap();

        assert!(!db.compare_and_set_balance(user.user_id, 99, 50).await.unwrap());
        assert!(db.compare_and_set_balance(user.user_id, 100, 50).await.unwrap());
        let stored = db.get_user_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(stored.token_balance, 50);
    }

    #[tokio::test]
    async fn owner_scoped_reads_hide_other_users_rows() {
        let db = MemoryAdapter::new();
        let owner = Uuid::new_v4();
        let doc = db.create_document(owner, "t", "c", 1).await.unwrap();

        assert!(db.get_document(doc.id, owner).await.unwrap().is_some());
        assert!(db.get_document(doc.id, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_auth_sessions_are_rejected() {
        let db = MemoryAdapter::new();
        let user_id = Uuid::new_v4();
        db.create_auth_session("old", user_id, Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert!(matches!(
            db.validate_auth_session("old").await,
            Err(PortError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn usage_history_is_newest_first_and_limited() {
        let db = MemoryAdapter::new();
        let user_id = Uuid::new_v4();
        for i in 0..3 {
            db.append_usage_record(TokenUsageRecord {
                id: Uuid::new_v4(),
                actor: Actor::User(user_id),
                kind: profiler_core::domain::UsageKind::Analysis,
                tokens_used: i,
                tokens_remaining: 0,
                description: format!("row {}", i),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let rows = db.get_usage_for_user(user_id, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tokens_used, 2);
        assert_eq!(rows[1].tokens_used, 1);
    }
}
