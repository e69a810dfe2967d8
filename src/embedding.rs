//! Embedding providers.
//!
//! Concrete implementations of [`marble_core::embedding::EmbeddingProvider`]:
//! - **[`DisabledProvider`]**: rejects every request; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls `POST /v1/embeddings`.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Both HTTP providers split inputs into `batch_size` requests, retry
//! transient failures (see [`http_retry`](crate::http_retry)), and pass
//! every response through
//! [`normalize_embedding_response`](marble_core::embedding::normalize_embedding_response).

use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;

use marble_core::embedding::{normalize_embedding_response, EmbeddingProvider};
use marble_core::error::{Error, Result, Service};

use crate::config::EmbeddingConfig;
use crate::http_retry::{client, send_json};

/// Instantiate the provider named by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::validation("embedding provider is disabled"))
    }
}

// ============ Batching ============

async fn embed_batched<F>(
    texts: &[String],
    batch_size: usize,
    mut call: impl FnMut(Vec<String>) -> F,
) -> Result<Vec<Vec<f32>>>
where
    F: std::future::Future<Output = Result<serde_json::Value>>,
{
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let json = call(batch.to_vec()).await?;
        let vectors = normalize_embedding_response(&json)?;
        if vectors.len() != batch.len() {
            return Err(Error::Consistency(format!(
                "embedding batch of {} texts returned {} vectors",
                batch.len(),
                vectors.len()
            )));
        }
        out.extend(vectors);
    }
    Ok(out)
}

// ============ OpenAI Provider ============

pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            client: client(config.timeout_secs)?,
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/v1/embeddings", self.url);
        embed_batched(texts, self.batch_size, |batch| {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let endpoint = endpoint.clone();
            async move {
                send_json(Service::Embedding, "OpenAI embeddings", self.max_retries, || {
                    self.client
                        .post(&endpoint)
                        .bearer_auth(&self.api_key)
                        .json(&body)
                })
                .await
            }
        })
        .await
    }
}

// ============ Ollama Provider ============

pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: client(config.timeout_secs)?,
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url);
        embed_batched(texts, self.batch_size, |batch| {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let endpoint = endpoint.clone();
            async move {
                send_json(Service::Embedding, "Ollama embed", self.max_retries, || {
                    self.client.post(&endpoint).json(&body)
                })
                .await
            }
        })
        .await
    }
}
