//! services/api/src/adapters/openai_llm.rs
//!
//! This module contains the adapter for every provider that speaks the OpenAI
//! chat-completions protocol (OpenAI itself, DeepSeek and Perplexity).
//! It implements the `LanguageModel` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use profiler_core::{
    domain::Provider,
    ports::{LanguageModel, PortError, PortResult},
};
use tracing::debug;

pub const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com";
pub const PERPLEXITY_API_BASE: &str = "https://api.perplexity.ai";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `LanguageModel` using an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiCompatibleAdapter {
    provider: Provider,
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompatibleAdapter {
    /// Creates a new `OpenAiCompatibleAdapter` from an already configured client.
    pub fn new(provider: Provider, client: Client<OpenAIConfig>, model: String) -> Self {
        Self {
            provider,
            client,
            model,
        }
    }

    /// Builds the client for `provider`; `api_base` of `None` keeps the OpenAI default.
    pub fn with_api_key(
        provider: Provider,
        api_key: &str,
        api_base: Option<&str>,
        model: String,
    ) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = api_base {
            config = config.with_api_base(base);
        }
        Self::new(provider, Client::with_config(config), model)
    }
}

//=========================================================================================
// `LanguageModel` Trait Implementation
//=========================================================================================

#[async_trait]
impl LanguageModel for OpenAiCompatibleAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn complete(&self, system_prompt: &str, user_text: &str) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_text)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!("Sending {} chars to {} ({})", user_text.len(), self.provider, self.model);

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Provider(format!("{}: {}", self.provider, e)))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::InvalidResponse(format!(
                    "{} returned no text content in its response",
                    self.provider
                ))
            })
    }
}
