//! crates/profiler_core/src/domain.rs
//!
//! Defines the core data structures for the application.
//! These structs are independent of any database; the ones that travel to the
//! client or into a JSON column derive `serde`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Users and Sessions
//=========================================================================================

/// The permission level of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    /// Admins keep a pinned, unlimited balance and are never debited.
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown user role '{}'", other)),
        }
    }
}

/// Represents a registered user - used throughout app.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub token_balance: i64,
    pub is_registered: bool,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Admins sit outside the ledger: their balance is pinned to the unlimited
    /// sentinel, they are never debited, and neither the pinning nor their usage
    /// writes ledger rows. "Initial balance plus ledger deltas equals balance"
    /// holds for every other user.
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// An unauthenticated visitor, tracked by an opaque cookie token.
#[derive(Debug, Clone, Serialize)]
pub struct AnonymousSession {
    pub session_id: String,
    pub tokens_used: i64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

//=========================================================================================
// Token Ledger
//=========================================================================================

/// Who a ledger row belongs to. Exactly one of the two, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(Uuid),
    Session(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Analysis,
    Upload,
    Purchase,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Analysis => "analysis",
            UsageKind::Upload => "upload",
            UsageKind::Purchase => "purchase",
        }
    }
}

impl FromStr for UsageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(UsageKind::Analysis),
            "upload" => Ok(UsageKind::Upload),
            "purchase" => Ok(UsageKind::Purchase),
            other => Err(format!("unknown usage kind '{}'", other)),
        }
    }
}

/// One append-only ledger entry.
///
/// `tokens_used` is signed: debits are positive, purchases are negative, so the
/// ledger stays a single stream that reconstructs the balance.
#[derive(Debug, Clone, Serialize)]
pub struct TokenUsageRecord {
    pub id: Uuid,
    pub actor: Actor,
    pub kind: UsageKind,
    pub tokens_used: i64,
    pub tokens_remaining: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Documents, Analyses and Reports
//=========================================================================================

/// Represents a text document uploaded by a user.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub word_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Intelligence,
    Originality,
    Cognitive,
    Comprehensive,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Intelligence => "intelligence",
            AnalysisType::Originality => "originality",
            AnalysisType::Cognitive => "cognitive",
            AnalysisType::Comprehensive => "comprehensive",
        }
    }
}

impl FromStr for AnalysisType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intelligence" => Ok(AnalysisType::Intelligence),
            "originality" => Ok(AnalysisType::Originality),
            "cognitive" => Ok(AnalysisType::Cognitive),
            "comprehensive" => Ok(AnalysisType::Comprehensive),
            other => Err(format!("unknown analysis type '{}'", other)),
        }
    }
}

/// The large-language-model vendors a request can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[serde(alias = "openai")]
    OpenAi,
    Anthropic,
    #[serde(alias = "deepseek")]
    DeepSeek,
    Perplexity,
    /// The local keyword scorer, used when a provider call degrades.
    Heuristic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "open_ai",
            Provider::Anthropic => "anthropic",
            Provider::DeepSeek => "deep_seek",
            Provider::Perplexity => "perplexity",
            Provider::Heuristic => "heuristic",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open_ai" | "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "deep_seek" | "deepseek" => Ok(Provider::DeepSeek),
            "perplexity" => Ok(Provider::Perplexity),
            "heuristic" => Ok(Provider::Heuristic),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// The short-form result of a single scoring rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveAnalysis {
    pub score: f64,
    pub characteristics: Vec<String>,
    pub analysis: String,
    pub strengths: Vec<String>,
    pub tendencies: Vec<String>,
}

/// A submitted text and, once the provider answered, its result.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub input_text: String,
    pub analysis_type: AnalysisType,
    pub provider: Provider,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The ten fields of the long-form cognitive report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSections {
    pub intelligence: String,
    pub abstract_thinking: String,
    pub originality: String,
    pub reasoning_style: String,
    pub ambiguity_handling: String,
    pub metacognition: String,
    pub thinking_type: String,
    pub cognitive_complexity: String,
    pub thinking_quality: String,
    pub archetype: String,
}

impl ReportSections {
    /// Number of sections a long-form report is made of.
    pub const COUNT: usize = 10;

    /// Mutable access by 1-based section number.
    pub fn field_mut(&mut self, section: usize) -> Option<&mut String> {
        match section {
            1 => Some(&mut self.intelligence),
            2 => Some(&mut self.abstract_thinking),
            3 => Some(&mut self.originality),
            4 => Some(&mut self.reasoning_style),
            5 => Some(&mut self.ambiguity_handling),
            6 => Some(&mut self.metacognition),
            7 => Some(&mut self.thinking_type),
            8 => Some(&mut self.cognitive_complexity),
            9 => Some(&mut self.thinking_quality),
            10 => Some(&mut self.archetype),
            _ => None,
        }
    }

    pub fn field(&self, section: usize) -> Option<&str> {
        match section {
            1 => Some(&self.intelligence),
            2 => Some(&self.abstract_thinking),
            3 => Some(&self.originality),
            4 => Some(&self.reasoning_style),
            5 => Some(&self.ambiguity_handling),
            6 => Some(&self.metacognition),
            7 => Some(&self.thinking_type),
            8 => Some(&self.cognitive_complexity),
            9 => Some(&self.thinking_quality),
            10 => Some(&self.archetype),
            _ => None,
        }
    }
}

impl Default for ReportSections {
    fn default() -> Self {
        Self {
            intelligence: "No intelligence assessment was returned.".to_string(),
            abstract_thinking: "No abstract-thinking assessment was returned.".to_string(),
            originality: "No originality assessment was returned.".to_string(),
            reasoning_style: "No reasoning-style assessment was returned.".to_string(),
            ambiguity_handling: "No ambiguity-handling assessment was returned.".to_string(),
            metacognition: "No metacognition assessment was returned.".to_string(),
            thinking_type: "No thinking-type assessment was returned.".to_string(),
            cognitive_complexity: "No cognitive-complexity assessment was returned.".to_string(),
            thinking_quality: "No thinking-quality assessment was returned.".to_string(),
            archetype: "No archetype was returned.".to_string(),
        }
    }
}

/// A stored long-form report, tied to the analysis request that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveReport {
    pub id: Uuid,
    pub analysis_request_id: Uuid,
    pub user_id: Uuid,
    pub provider: Provider,
    pub sections: ReportSections,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Payments
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// One row per charge attempt, keyed by the processor's intent id.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub intent_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub tokens_purchased: i64,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//=========================================================================================
// Request Identity
//=========================================================================================

/// Who an inbound request acts as: exactly one of a signed-in user or an
/// anonymous session.
#[derive(Debug, Clone)]
pub enum Identity {
    User(User),
    Anonymous(AnonymousSession),
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::User(user) => Some(user),
            Identity::Anonymous(_) => None,
        }
    }

    pub fn actor(&self) -> Actor {
        match self {
            Identity::User(user) => Actor::User(user.user_id),
            Identity::Anonymous(session) => Actor::Session(session.session_id.clone()),
        }
    }
}
