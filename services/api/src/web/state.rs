//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-request values the
//! middleware hands to the handlers.

use crate::config::Config;
use profiler_core::{
    accounting::TokenAccountant, analysis::AnalyzerRegistry, payments::PaymentBridge,
    ports::DatabaseService,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub accountant: TokenAccountant,
    pub analyzers: AnalyzerRegistry,
    /// `None` when no payment processor is configured.
    pub payments: Option<PaymentBridge>,
}

impl AppState {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        config: Arc<Config>,
        analyzers: AnalyzerRegistry,
        payments: Option<PaymentBridge>,
    ) -> Self {
        Self {
            accountant: TokenAccountant::new(db.clone()),
            db,
            config,
            analyzers,
            payments,
        }
    }
}

//=========================================================================================
// Request Extensions
//=========================================================================================

/// Output tokens a route is expected to produce, used by the limit check.
#[derive(Debug, Clone, Copy)]
pub struct OutputBudget(pub i64);

/// Token estimate computed by `check_token_limits` for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl TokenEstimate {
    pub fn total(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}
