//! services/api/src/adapters/anthropic_llm.rs
//!
//! `LanguageModel` over the Anthropic Messages API, called with `reqwest`.

use async_trait::async_trait;
use profiler_core::{
    domain::Provider,
    ports::{LanguageModel, PortError, PortResult},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Clone)]
pub struct AnthropicAdapter {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl AnthropicAdapter {
    pub fn new(http: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            http,
            api_key,
            model,
            endpoint: MESSAGES_URL.to_string(),
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Joins every text block of a Messages API reply.
fn collect_text(response: MessagesResponse) -> Option<String> {
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

#[async_trait]
impl LanguageModel for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn complete(&self, system_prompt: &str, user_text: &str) -> PortResult<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: system_prompt,
            messages: [Message {
                role: "user",
                content: user_text,
            }],
        };

        debug!("Sending {} chars to anthropic ({})", user_text.len(), self.model);

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Provider(format!("anthropic: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PortError::Provider(format!(
                "anthropic returned {}: {}",
                status, detail
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| PortError::InvalidResponse(format!("anthropic: {}", e)))?;

        collect_text(parsed).ok_or_else(|| {
            PortError::InvalidResponse("anthropic returned no text content".to_string())
        })
    }
}
