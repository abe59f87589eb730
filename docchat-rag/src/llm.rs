//! Language model backends used to phrase answers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{RagError, Result};
use crate::openai::error_detail;

/// Groq's OpenAI-compatible API base URL.
pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// The default chat model.
pub const DEFAULT_CHAT_MODEL: &str = "llama-3.3-70b-versatile";

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// A chat-style language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete the conversation and return the assistant's reply.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Name used in logs and [`RagError::Backend`] values.
    fn name(&self) -> &str;
}

/// Client for OpenAI-compatible `/chat/completions` APIs (Groq by default).
///
/// A missing API key is accepted at construction and reported as a
/// [`RagError::Backend`] on the first call, so ingestion works without one.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::{ChatCompletionsClient, ChatMessage, LanguageModel};
///
/// let llm = ChatCompletionsClient::new(std::env::var("GROQ_API_KEY").ok());
/// let reply = llm.complete(&[ChatMessage::user("hello")]).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    name: String,
}

impl ChatCompletionsClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: GROQ_API_BASE.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: None,
            name: format!("llm:{DEFAULT_CHAT_MODEL}"),
        }
    }

    /// Set the API base URL (without the trailing `/chat/completions`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.name = format!("llm:{}", self.model);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the first non-empty completion out of a response body.
fn first_completion(response: CompletionResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            RagError::backend(
                &self.name,
                "no API key configured; set DOCCHAT_LLM_API_KEY or GROQ_API_KEY",
            )
        })?;

        debug!(backend = %self.name, messages = messages.len(), "requesting completion");

        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(backend = %self.name, error = %e, "request failed");
                RagError::backend(&self.name, format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = error_detail(response.text().await.unwrap_or_default());
            error!(backend = %self.name, %status, "API error");
            return Err(RagError::backend(&self.name, format!("API returned {status}: {detail}")));
        }

        let body: CompletionResponse = response.json().await.map_err(|e| {
            error!(backend = %self.name, error = %e, "failed to parse response");
            RagError::backend(&self.name, format!("failed to parse response: {e}"))
        })?;

        first_completion(body)
            .ok_or_else(|| RagError::backend(&self.name, "API returned an empty completion"))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
