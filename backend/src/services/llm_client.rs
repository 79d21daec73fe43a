//! LLM provider contract and the OpenAI-compatible HTTP implementation.
//!
//! The worker talks to an ordered provider chain: a primary endpoint
//! (reference deployment: a local model server) and an optional hosted
//! fallback. The chain records which provider produced each result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LlmConfig;
use crate::utils::{AppError, AppResult};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> AppResult<String>;
}

// ============================================================================
// OpenAI-compatible chat completions
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct OpenAiCompatProvider {
    name: String,
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> AppResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature,
            max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::llm_provider(format!("{}: {}", self.name, e)))?;

        if !response.status().is_success() {
            return Err(AppError::llm_provider(format!(
                "{}: HTTP {}",
                self.name,
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::llm_provider(format!("{}: {}", self.name, e)))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AppError::llm_provider(format!("{}: empty choices", self.name)))
    }
}

// ============================================================================
// Ordered fallback chain
// ============================================================================

pub struct ProviderChain {
    providers: Vec<Arc<dyn LlmProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        Self { providers }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: Vec<Arc<dyn LlmProvider>> = vec![Arc::new(OpenAiCompatProvider::new(
            "primary",
            &config.primary_base_url,
            &config.primary_model,
            config.primary_api_key.clone(),
            config.request_timeout_secs,
        ))];

        if let (Some(base_url), Some(model)) = (&config.fallback_base_url, &config.fallback_model)
        {
            providers.push(Arc::new(OpenAiCompatProvider::new(
                "fallback",
                base_url,
                model,
                config.fallback_api_key.clone(),
                config.request_timeout_secs,
            )));
        }

        Self { providers }
    }

    /// Try providers in order; return the first success together with the
    /// producing provider's name.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> AppResult<(String, String)> {
        let mut last_error =
            AppError::llm_provider("no LLM providers configured".to_string());

        for provider in &self.providers {
            match provider.complete(system, user, temperature, max_tokens).await {
                Ok(text) => return Ok((provider.name().to_string(), text)),
                Err(e) => {
                    warn!("LLM provider '{}' failed: {}", provider.name(), e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
