//! OpenRouter chat-completions client for answer generation and field
//! extraction.
//!
//! This module is only available when the `openrouter` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{RagError, Result};
use crate::extract::{ExtractionModel, extraction_prompt};
use crate::generation::{AnswerGenerator, qa_prompt};

/// The OpenRouter chat-completions endpoint.
const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// The default chat model.
const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

const PROVIDER: &str = "OpenRouter";
const TEMPERATURE: f32 = 0.1;
const MAX_TOKENS: u32 = 500;

/// An [`AnswerGenerator`] and [`ExtractionModel`] backed by OpenRouter.
///
/// # Configuration
///
/// - `model` – defaults to `openai/gpt-3.5-turbo`.
/// - `api_key` – from the constructor or the `OPENROUTER_API_KEY` environment variable.
///
/// Requests use temperature 0.1 and at most 500 completion tokens. Callers
/// bound the request time; the client itself sets no timeout.
///
/// # Example
///
/// ```rust,ignore
/// use udi_rag::openrouter::OpenRouterClient;
///
/// let client = Arc::new(OpenRouterClient::from_env()?);
/// let qa = DocumentQa::builder()
///     .embedding_provider(embedder)
///     .generator(client.clone())
///     .extraction_model(client)
///     .open()?;
/// ```
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::GenerationUnavailable {
                provider: PROVIDER.into(),
                message: "API key must not be empty".into(),
            });
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.into(),
            url: OPENROUTER_CHAT_URL.into(),
        })
    }

    /// Create a new client using the `OPENROUTER_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key =
            std::env::var("OPENROUTER_API_KEY").map_err(|_| RagError::GenerationUnavailable {
                provider: PROVIDER.into(),
                message: "OPENROUTER_API_KEY environment variable not set".into(),
            })?;
        Self::new(api_key)
    }

    /// Set the model name (e.g. `anthropic/claude-3-haiku`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Send requests to a different chat-completions URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// The configured model.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(
            provider = PROVIDER,
            model = %self.model,
            prompt_len = prompt.len(),
            "chat completion"
        );

        let request_body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                unavailable(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            error!(provider = PROVIDER, %status, "API error");
            return Err(unavailable(format!("API returned {status}: {detail}")));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            unavailable(format!("failed to parse response: {e}"))
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| unavailable("API returned no choices".into()))
    }
}

fn unavailable(message: String) -> RagError {
    RagError::GenerationUnavailable { provider: PROVIDER.into(), message }
}

// ── OpenRouter API request/response types ──────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── Collaborator implementations ───────────────────────────────────

#[async_trait]
impl AnswerGenerator for OpenRouterClient {
    async fn generate(&self, question: &str, context: &[&str]) -> Result<String> {
        self.complete(&qa_prompt(question, context)).await
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[async_trait]
impl ExtractionModel for OpenRouterClient {
    async fn extract_json(&self, document_text: &str) -> Result<String> {
        self.complete(&extraction_prompt(document_text)).await
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            OpenRouterClient::new(""),
            Err(RagError::GenerationUnavailable { .. })
        ));
    }

    #[test]
    fn request_matches_the_chat_completions_shape() {
        let body = ChatRequest {
            model: DEFAULT_MODEL,
            messages: vec![ChatMessage { role: "user", content: "hi" }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "openai/gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 500);
    }

    #[test]
    fn response_content_is_read_from_the_first_choice() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": " $1,250.00 "}}]}"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.choices[0].message.content.trim(), "$1,250.00");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_generation_unavailable() {
        let client = OpenRouterClient::new("test-key").unwrap().with_url("http://127.0.0.1:9/v1");
        let err = client.generate("rate?", &["Rate: $1,250.00 USD"]).await.unwrap_err();
        assert!(matches!(err, RagError::GenerationUnavailable { .. }));
    }
}
