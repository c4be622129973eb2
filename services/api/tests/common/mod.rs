//! Fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use api_lib::{adapters::MemoryAdapter, config::Config, web::state::AppState};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, Response},
};
use profiler_core::{
    analysis::{prompts::COMPREHENSIVE_REPORT_PROMPT, AnalyzerRegistry},
    domain::Provider,
    payments::PaymentBridge,
    ports::{
        ChargeIntent, DatabaseService, IntentMetadata, IntentStatus, LanguageModel,
        PaymentProcessor, PortError, PortResult, WebhookEvent,
    },
    TokenAccountant,
};

pub const GOOD_ANALYSIS: &str = r#"{"score": 118, "characteristics": ["curious"], "analysis": "Asks sharp questions.", "strengths": ["focus"], "tendencies": ["tangents"]}"#;

pub const GOOD_REPORT: &str = "1. Intelligence: High.\n2. Abstract Thinking: Strong.\n3. Originality: Notable.\n4. Reasoning Style: Deductive.\n5. Ambiguity Handling: Calm.\n6. Metacognition: Present.\n7. Thinking Type: Analytical.\n8. Cognitive Complexity: Layered.\n9. Thinking Quality: Careful.\n10. Archetype: The Explorer.";

/// Answers the report prompt with `GOOD_REPORT` and everything else with `GOOD_ANALYSIS`.
pub struct FakeModel {
    pub provider: Provider,
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn complete(&self, system_prompt: &str, _user_text: &str) -> PortResult<String> {
        if system_prompt == COMPREHENSIVE_REPORT_PROMPT {
            Ok(GOOD_REPORT.to_string())
        } else {
            Ok(GOOD_ANALYSIS.to_string())
        }
    }
}

/// A processor whose intents the test settles by hand.
///
/// Webhooks verify when the signature header is `valid`; the payload is
/// `<event>:<intent id>`.
#[derive(Default)]
pub struct FakeProcessor {
    intents: Mutex<HashMap<String, ChargeIntent>>,
    pub fail_retrieval: Mutex<bool>,
}

impl FakeProcessor {
    pub fn set_status(&self, intent_id: &str, status: IntentStatus) {
        if let Some(intent) = self.intents.lock().unwrap().get_mut(intent_id) {
            intent.status = status;
        }
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        _metadata: &IntentMetadata,
    ) -> PortResult<ChargeIntent> {
        let mut intents = self.intents.lock().unwrap();
        let id = format!("pi_test_{}", intents.len() + 1);
        let intent = ChargeIntent {
            id: id.clone(),
            client_secret: Some(format!("{}_secret", id)),
            amount_cents,
            currency: currency.to_string(),
            status: IntentStatus::Pending,
        };
        intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> PortResult<ChargeIntent> {
        if *self.fail_retrieval.lock().unwrap() {
            return Err(PortError::Provider("processor unavailable".to_string()));
        }
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(intent_id.to_string()))
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> PortResult<WebhookEvent> {
        if signature_header != "valid" {
            return Err(PortError::Unauthorized);
        }
        let payload = String::from_utf8_lossy(payload);
        let (kind, intent_id) = payload
            .split_once(':')
            .ok_or_else(|| PortError::InvalidResponse("bad fake payload".to_string()))?;
        let intent_id = intent_id.to_string();
        Ok(match kind {
            "succeeded" => WebhookEvent::PaymentSucceeded { intent_id },
            "failed" => WebhookEvent::PaymentFailed { intent_id },
            other => WebhookEvent::Ignored {
                event_type: other.to_string(),
            },
        })
    }
}

pub struct TestApp {
    pub db: Arc<MemoryAdapter>,
    pub processor: Arc<FakeProcessor>,
    pub state: Arc<AppState>,
}

pub fn test_app(config: Config, with_payments: bool) -> TestApp {
    let db = Arc::new(MemoryAdapter::new());
    let processor = Arc::new(FakeProcessor::default());
    let shared_db: Arc<dyn DatabaseService> = db.clone();

    let mut analyzers = AnalyzerRegistry::new();
    analyzers.register_model(
        Arc::new(FakeModel {
            provider: Provider::OpenAi,
        }),
        false,
    );

    let payments = with_payments.then(|| {
        PaymentBridge::new(
            shared_db.clone(),
            processor.clone(),
            TokenAccountant::new(shared_db.clone()),
        )
    });
    let state = Arc::new(AppState::new(
        shared_db,
        Arc::new(config),
        analyzers,
        payments,
    ));

    TestApp {
        db,
        processor,
        state,
    }
}

pub fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

/// The `name=value` pair of the named `Set-Cookie` header, ready to send back.
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with(&format!("{}=", name)))
        .map(str::to_string)
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
