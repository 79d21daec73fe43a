//! Embedding service client.
//!
//! The service exposes two endpoints backed by two different models: a
//! multilingual retrieval model and a multilingual paraphrase model. The
//! two vector spaces are not interchangeable; callers pick the endpoint
//! matching the index they feed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::utils::{AppError, AppResult};

/// Expected vector width from both endpoints.
pub const EMBEDDING_DIM: usize = 768;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_retrieval(&self, title: &str, content: &str) -> AppResult<Vec<f32>>;
    async fn embed_paraphrase(&self, title: &str, content: &str) -> AppResult<Vec<f32>>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    title: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    status: String,
    #[serde(default)]
    vector: Vec<f32>,
}

pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, base_url: config.base_url.trim_end_matches('/').to_string() }
    }

    async fn embed(&self, endpoint: &str, title: &str, content: &str) -> AppResult<Vec<f32>> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { title, content })
            .send()
            .await
            .map_err(|e| AppError::embedding_unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::embedding_unavailable(format!(
                "embedding endpoint {} returned HTTP {}",
                endpoint,
                response.status()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::embedding_unavailable(e.to_string()))?;

        if body.status != "ok" {
            return Err(AppError::embedding_unavailable(format!(
                "embedding endpoint {} returned status '{}'",
                endpoint, body.status
            )));
        }
        if body.vector.len() != EMBEDDING_DIM {
            return Err(AppError::embedding_unavailable(format!(
                "embedding endpoint {} returned {} dimensions, expected {}",
                endpoint,
                body.vector.len(),
                EMBEDDING_DIM
            )));
        }

        Ok(body.vector)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed_retrieval(&self, title: &str, content: &str) -> AppResult<Vec<f32>> {
        self.embed("embed/retrieval", title, content).await
    }

    async fn embed_paraphrase(&self, title: &str, content: &str) -> AppResult<Vec<f32>> {
        self.embed("embed/paraphrase", title, content).await
    }
}
