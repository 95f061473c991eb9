//! The LLM seam.
//!
//! The model backend is an external collaborator; the executive only
//! depends on [`ChatModel`]. The shipped implementation talks to an
//! Ollama-compatible `/api/chat` endpoint.

use async_trait::async_trait;
use gladys_core::retry::{with_retry, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const DEFAULT_MODEL: &str = "llama3";

/// Errors from the LLM backend.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LlmError {
    /// The backend could not be reached.
    #[error("llm backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something unusable.
    #[error("invalid llm response: {0}")]
    InvalidResponse(String),

    /// The call exceeded its wall-clock budget.
    #[error("llm call timed out")]
    Timeout,
}

impl LlmError {
    /// Transient failures worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Message role in a chat exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Chat completion over a message list.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate one assistant message for the conversation.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Identifier of the backing model.
    fn model_id(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Chat via a local Ollama-compatible HTTP endpoint.
#[derive(Clone, Debug)]
pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    retry_policy: RetryPolicy,
}

impl OllamaChat {
    /// Chat client against the given base URL (e.g. "<http://localhost:11434>").
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            retry_policy: RetryPolicy::exponential(2),
        }
    }

    /// Set the model name (e.g. "llama3", "mistral", "phi3").
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let response = with_retry(&self.retry_policy, LlmError::is_retryable, || {
            let request = ChatRequest {
                model: &self.model,
                messages,
                stream: false,
                options: self.temperature.map(|t| ChatOptions { temperature: t }),
            };
            let client = self.client.clone();
            let url = url.clone();
            async move {
                let http = client
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| LlmError::Unavailable(e.to_string()))?;
                if !http.status().is_success() {
                    return Err(LlmError::Unavailable(format!(
                        "chat endpoint returned {}",
                        http.status()
                    )));
                }
                http.json::<ChatResponse>()
                    .await
                    .map_err(|e| LlmError::InvalidResponse(e.to_string()))
            }
        })
        .await?;

        debug!(model = %self.model, chars = response.message.content.len(), "chat completion");
        Ok(response.message.content)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn generates_via_the_ollama_chat_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(
                serde_json::json!({"model": "llama3", "stream": false}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "stay calm and heal up"}
            })))
            .mount(&server)
            .await;

        let chat = OllamaChat::new(server.uri());
        let reply = chat
            .generate(&[
                ChatMessage::system("you are a helpful gaming companion"),
                ChatMessage::user("health is at 10%"),
            ])
            .await
            .unwrap();
        assert_eq!(reply, "stay calm and heal up");
    }

    #[tokio::test]
    async fn backend_failure_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let chat = OllamaChat {
            retry_policy: RetryPolicy::none(),
            ..OllamaChat::new(server.uri())
        };
        let err = chat.generate(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }
}
