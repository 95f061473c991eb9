//! Ollama-compatible embedding backend.

use async_trait::async_trait;
use gladys_core::embedding::{check_dimension, EmbedError, Embedder};
use gladys_core::retry::{with_retry, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_MODEL: &str = "all-minilm";

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

/// Embeddings via a local Ollama-compatible HTTP endpoint.
///
/// Ollama serves embeddings at `/api/embeddings` and is deterministic per
/// (model, text), which the storage round-trip invariants rely on.
#[derive(Clone, Debug)]
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    retry_policy: RetryPolicy,
}

impl OllamaEmbedder {
    /// Embedder against the given base URL (e.g. "<http://localhost:11434>").
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: DEFAULT_MODEL.to_string(),
            dimension: gladys_core::DEFAULT_EMBEDDING_DIM,
            retry_policy: RetryPolicy::exponential(3),
        }
    }

    /// Set the model name.
    ///
    /// Common choices: `all-minilm` (384 dimensions, fast),
    /// `nomic-embed-text` (768 dimensions, higher quality).
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the expected dimensionality. Responses with any other length
    /// are rejected.
    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let response = with_retry(&self.retry_policy, EmbedError::is_retryable, || {
            let request = EmbeddingsRequest {
                model: &self.model,
                prompt: text,
            };
            let client = self.client.clone();
            let url = url.clone();
            async move {
                let http = client
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
                if !http.status().is_success() {
                    return Err(EmbedError::Unavailable(format!(
                        "embedding endpoint returned {}",
                        http.status()
                    )));
                }
                http.json::<EmbeddingsResponse>()
                    .await
                    .map_err(|e| EmbedError::InvalidResponse(e.to_string()))
            }
        })
        .await?;

        check_dimension(&response.embedding, self.dimension)?;
        debug!(model = %self.model, len = response.embedding.len(), "embedding generated");
        Ok(response.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
