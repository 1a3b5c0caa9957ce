//! OpenAI-compatible embedding and chat-completion backends.
//!
//! This module is only available when the `openai` feature is enabled. Both
//! types talk to any server exposing the OpenAI `/embeddings` and
//! `/chat/completions` routes; set the base URL to target a proxy or a local
//! deployment.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::{DEFAULT_MAX_BATCH_SIZE, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generation::LanguageModel;
use crate::prompt::Prompt;

/// The default API base.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Read `OPENAI_API_KEY`.
pub fn api_key_from_env() -> Option<String> {
    std::env::var("OPENAI_API_KEY").ok().filter(|key| !key.trim().is_empty())
}

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
///
/// # Configuration
///
/// - `model` defaults to `text-embedding-ada-002` (1536 dimensions).
/// - `dimensions` must match what the model returns; it is recorded in
///   every collection built with this provider.
/// - `max_batch_size` bounds the inputs sent per request.
///
/// # Example
///
/// ```rust,ignore
/// use raggpt_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new("sk-...")?.with_model("text-embedding-3-small");
/// let embedding = provider.embed("hello world").await?;
/// ```
#[derive(Clone)]
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    dimensions: usize,
    max_batch_size: usize,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider with the default model.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `api_key` is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: non_empty_key(api_key.into())?,
            api_base: OPENAI_API_BASE.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        })
    }

    /// Create a provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env().ok_or_else(missing_key)?)
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the dimensionality the model returns.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Set the API base, e.g. `http://localhost:8080/v1`.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    fn service_error(&self, message: String) -> RagError {
        RagError::EmbeddingService { provider: self.model.clone(), message }
    }
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Send `body` to `url` and decode a successful JSON response.
///
/// Errors are plain messages; callers wrap them in their service error.
async fn post_json<B, R>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &B,
) -> std::result::Result<R, String>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("API returned {status}: {}", error_detail(body)));
    }

    response.json().await.map_err(|e| format!("failed to parse response: {e}"))
}

fn error_detail(body: String) -> String {
    serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body)
}

fn non_empty_key(api_key: String) -> Result<String> {
    if api_key.trim().is_empty() {
        return Err(RagError::InvalidConfiguration("API key must not be empty".to_string()));
    }
    Ok(api_key)
}

fn missing_key() -> RagError {
    RagError::InvalidConfiguration("OPENAI_API_KEY environment variable not set".to_string())
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, batch_size = texts.len(), "embedding batch");

        let url = format!("{}/embeddings", self.api_base);
        let request = EmbeddingRequest { model: &self.model, input: texts };
        let mut response: EmbeddingResponse =
            post_json(&self.client, &url, &self.api_key, &request).await.map_err(|message| {
                error!(model = %self.model, error = %message, "embedding request failed");
                self.service_error(message)
            })?;

        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// A [`LanguageModel`] backed by the OpenAI chat-completions API.
///
/// Sends the prompt's system instruction as the `system` message and the
/// assembled history, context, and question as one `user` message.
#[derive(Clone)]
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAIChatModel {
    /// Create a chat model with the default model name.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: non_empty_key(api_key.into())?,
            api_base: OPENAI_API_BASE.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
        })
    }

    /// Create a chat model using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env().ok_or_else(missing_key)?)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn request<'a>(&'a self, prompt: &'a Prompt, temperature: f32) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &prompt.system },
                ChatMessage { role: "user", content: &prompt.user },
            ],
            temperature,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt, temperature: f32) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let service_error = |message: String| RagError::GenerationService {
            provider: self.model.clone(),
            message,
        };

        let response: ChatResponse =
            post_json(&self.client, &url, &self.api_key, &self.request(prompt, temperature))
                .await
                .map_err(service_error)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| service_error("response contained no message content".to_string()))
    }
}
