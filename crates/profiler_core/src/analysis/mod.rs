//! crates/profiler_core/src/analysis/mod.rs
//!
//! Turns raw provider output into the fixed report shapes.
//!
//! `Analyzer` has two kinds of implementation: `ProviderAnalyzer` calls a
//! language model and normalizes its answer, `HeuristicAnalyzer` scores the text
//! locally. `FallbackAnalyzer` composes the two for the providers that are
//! allowed to degrade instead of failing.

pub mod heuristic;
pub mod prompts;
pub mod report_parser;
pub mod short_form;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{AnalysisType, CognitiveAnalysis, Provider, ReportSections};
use crate::ports::{LanguageModel, PortError, PortResult};

pub use heuristic::{CategoryHits, HeuristicScorer};
pub use report_parser::ReportParser;
pub use short_form::{parse_cognitive_analysis, NormalizeError};

/// A normalized result plus what it took to produce it.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome<T> {
    /// Who actually produced the value; `Heuristic` when a call degraded.
    pub provider: Provider,
    pub value: T,
    /// Raw text the provider returned, used to price the output side.
    pub raw_output: String,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    fn provider(&self) -> Provider;

    async fn analyze(
        &self,
        text: &str,
        analysis_type: AnalysisType,
    ) -> PortResult<AnalysisOutcome<CognitiveAnalysis>>;

    async fn comprehensive_report(&self, text: &str) -> PortResult<AnalysisOutcome<ReportSections>>;
}

//=========================================================================================
// Provider-backed Analyzer
//=========================================================================================

/// Calls a language model with the rubric prompt and normalizes the answer.
#[derive(Clone)]
pub struct ProviderAnalyzer {
    model: Arc<dyn LanguageModel>,
}

impl ProviderAnalyzer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Analyzer for ProviderAnalyzer {
    fn provider(&self) -> Provider {
        self.model.provider()
    }

    async fn analyze(
        &self,
        text: &str,
        analysis_type: AnalysisType,
    ) -> PortResult<AnalysisOutcome<CognitiveAnalysis>> {
        let raw_output = self
            .model
            .complete(&prompts::analysis_prompt(analysis_type), text)
            .await?;
        let value = parse_cognitive_analysis(&raw_output)?;
        Ok(AnalysisOutcome {
            provider: self.provider(),
            value,
            raw_output,
        })
    }

    async fn comprehensive_report(&self, text: &str) -> PortResult<AnalysisOutcome<ReportSections>> {
        let raw_output = self
            .model
            .complete(prompts::COMPREHENSIVE_REPORT_PROMPT, text)
            .await?;
        Ok(AnalysisOutcome {
            provider: self.provider(),
            value: ReportParser::parse(&raw_output),
            raw_output,
        })
    }
}

//=========================================================================================
// Local Heuristic Analyzer
//=========================================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer {
    scorer: HeuristicScorer,
}

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

fn serialized<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[async_trait]
impl Analyzer for HeuristicAnalyzer {
    fn provider(&self) -> Provider {
        Provider::Heuristic
    }

    async fn analyze(
        &self,
        text: &str,
        _analysis_type: AnalysisType,
    ) -> PortResult<AnalysisOutcome<CognitiveAnalysis>> {
        let value = self.scorer.score(text);
        Ok(AnalysisOutcome {
            provider: Provider::Heuristic,
            raw_output: serialized(&value),
            value,
        })
    }

    async fn comprehensive_report(&self, text: &str) -> PortResult<AnalysisOutcome<ReportSections>> {
        let value = self.scorer.report(text);
        Ok(AnalysisOutcome {
            provider: Provider::Heuristic,
            raw_output: serialized(&value),
            value,
        })
    }
}

//=========================================================================================
// Degrading Analyzer
//=========================================================================================

/// Tries the primary analyzer and answers with the heuristic if it fails.
#[derive(Clone)]
pub struct FallbackAnalyzer {
    primary: Arc<dyn Analyzer>,
    fallback: HeuristicAnalyzer,
}

impl FallbackAnalyzer {
    pub fn new(primary: Arc<dyn Analyzer>) -> Self {
        Self {
            primary,
            fallback: HeuristicAnalyzer::new(),
        }
    }
}

#[async_trait]
impl Analyzer for FallbackAnalyzer {
    fn provider(&self) -> Provider {
        self.primary.provider()
    }

    async fn analyze(
        &self,
        text: &str,
        analysis_type: AnalysisType,
    ) -> PortResult<AnalysisOutcome<CognitiveAnalysis>> {
        match self.primary.analyze(text, analysis_type).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(
                    "{} analysis failed ({}); using heuristic fallback",
                    self.primary.provider(),
                    e
                );
                self.fallback.analyze(text, analysis_type).await
            }
        }
    }

    async fn comprehensive_report(&self, text: &str) -> PortResult<AnalysisOutcome<ReportSections>> {
        match self.primary.comprehensive_report(text).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(
                    "{} report failed ({}); using heuristic fallback",
                    self.primary.provider(),
                    e
                );
                self.fallback.comprehensive_report(text).await
            }
        }
    }
}

//=========================================================================================
// Registry
//=========================================================================================

/// The analyzers available at runtime, keyed by provider.
#[derive(Clone)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<Provider, Arc<dyn Analyzer>>,
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerRegistry {
    /// A registry that only knows the local heuristic.
    pub fn new() -> Self {
        let mut analyzers: HashMap<Provider, Arc<dyn Analyzer>> = HashMap::new();
        analyzers.insert(Provider::Heuristic, Arc::new(HeuristicAnalyzer::new()));
        Self { analyzers }
    }

    /// Registers a model; with `degrade_to_heuristic` it is wrapped in a `FallbackAnalyzer`.
    pub fn register_model(&mut self, model: Arc<dyn LanguageModel>, degrade_to_heuristic: bool) {
        let provider = model.provider();
        let analyzer: Arc<dyn Analyzer> = Arc::new(ProviderAnalyzer::new(model));
        let analyzer: Arc<dyn Analyzer> = if degrade_to_heuristic {
            Arc::new(FallbackAnalyzer::new(analyzer))
        } else {
            analyzer
        };
        info!("Registered analyzer for {} (fallback: {})", provider, degrade_to_heuristic);
        self.analyzers.insert(provider, analyzer);
    }

    pub fn get(&self, provider: Provider) -> PortResult<Arc<dyn Analyzer>> {
        self.analyzers.get(&provider).cloned().ok_or_else(|| {
            PortError::NotConfigured(format!("no API key configured for provider {}", provider))
        })
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.analyzers.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedModel {
        provider: Provider,
        reply: Result<String, String>,
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn complete(&self, _system_prompt: &str, _user_text: &str) -> PortResult<String> {
            self.reply.clone().map_err(PortError::Provider)
        }
    }

    fn model(provider: Provider, reply: Result<&str, &str>) -> Arc<dyn LanguageModel> {
        Arc::new(CannedModel {
            provider,
            reply: reply.map(str::to_string).map_err(str::to_string),
        })
    }

    const GOOD_JSON: &str = r#"{"score": 121, "characteristics": ["a"], "analysis": "b", "strengths": ["c"], "tendencies": ["d"]}"#;

    #[tokio::test]
    async fn provider_analyzer_normalizes_json() {
        let analyzer = ProviderAnalyzer::new(model(Provider::OpenAi, Ok(GOOD_JSON)));
        let outcome = analyzer.analyze("text", AnalysisType::Cognitive).await.unwrap();
        assert_eq!(outcome.provider, Provider::OpenAi);
        assert_eq!(outcome.value.score, 121.0);
        assert_eq!(outcome.raw_output, GOOD_JSON);
    }

    #[tokio::test]
    async fn provider_analyzer_fails_on_malformed_output() {
        let analyzer = ProviderAnalyzer::new(model(Provider::OpenAi, Ok("not json")));
        let err = analyzer.analyze("text", AnalysisType::Cognitive).await.unwrap_err();
        assert!(matches!(err, PortError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn fallback_analyzer_degrades_to_heuristic() {
        let primary = Arc::new(ProviderAnalyzer::new(model(Provider::DeepSeek, Err("timeout"))));
        let analyzer = FallbackAnalyzer::new(primary);
        let outcome = analyzer.analyze("What if?", AnalysisType::Originality).await.unwrap();
        assert_eq!(analyzer.provider(), Provider::DeepSeek);
        assert_eq!(outcome.provider, Provider::Heuristic);

        let report = analyzer.comprehensive_report("What if?").await.unwrap();
        assert_eq!(report.provider, Provider::Heuristic);
    }

    #[tokio::test]
    async fn fallback_analyzer_passes_through_success() {
        let primary = Arc::new(ProviderAnalyzer::new(model(Provider::DeepSeek, Ok(GOOD_JSON))));
        let outcome = FallbackAnalyzer::new(primary)
            .analyze("text", AnalysisType::Intelligence)
            .await
            .unwrap();
        assert_eq!(outcome.provider, Provider::DeepSeek);
    }

    #[tokio::test]
    async fn registry_reports_unconfigured_providers() {
        let mut registry = AnalyzerRegistry::new();
        registry.register_model(model(Provider::Anthropic, Ok(GOOD_JSON)), false);
        assert!(registry.get(Provider::Anthropic).is_ok());
        assert!(registry.get(Provider::Heuristic).is_ok());
        assert!(matches!(
            registry.get(Provider::Perplexity),
            Err(PortError::NotConfigured(_))
        ));
    }
}
