pub mod accounting;
pub mod analysis;
pub mod domain;
pub mod payments;
pub mod ports;

pub use accounting::TokenAccountant;
pub use analysis::{Analyzer, AnalyzerRegistry};
pub use domain::{
    Actor, AnalysisRequest, AnalysisType, AnonymousSession, AuthSession, CognitiveAnalysis,
    ComprehensiveReport, Document, Identity, Payment, PaymentStatus, Provider, ReportSections,
    TokenUsageRecord, UsageKind, User, UserCredentials, UserRole,
};
pub use payments::PaymentBridge;
pub use ports::{
    DatabaseService, LanguageModel, PaymentProcessor, PortError, PortResult,
};
