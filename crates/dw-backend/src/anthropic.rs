//! Anthropic messages API client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::{build_http_client, check_status};
use crate::prompt::{user_message, SYSTEM_PROMPT};
use crate::{BackendError, Suggester};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// An allow rule is one short line; leave room for a few.
const MAX_TOKENS: u32 = 1024;

/// Anthropic API client.
pub struct AnthropicClient {
    api_key: String,
    model: String,
    api_url: String,
    http: Client,
}

impl AnthropicClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, BackendError> {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    /// Create a new client with a custom model.
    pub fn with_model(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            api_url: API_URL.to_string(),
            http: build_http_client()?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a system prompt and user message, returning the first text block.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, BackendError> {
        let body = build_request(&self.model, system_prompt, user_message);

        debug!(backend = "anthropic", model = %self.model, "sending request");
        let response = self
            .http
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response = check_status(response).await?;
        let resp: MessagesResponse = response.json().await?;
        extract_text(resp)
    }
}

#[async_trait]
impl Suggester for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn suggest(&self, line: &str) -> Result<String, BackendError> {
        let text = self.complete(SYSTEM_PROMPT, user_message(line)).await?;
        Ok(text.trim().to_string())
    }
}

fn build_request(model: &str, system_prompt: &str, user_message: &str) -> MessagesRequest {
    MessagesRequest {
        model: model.to_string(),
        max_tokens: MAX_TOKENS,
        temperature: 0.0,
        system: system_prompt.to_string(),
        messages: vec![ApiMessage {
            role: "user".to_string(),
            content: user_message.to_string(),
        }],
    }
}

fn extract_text(resp: MessagesResponse) -> Result<String, BackendError> {
    resp.content
        .into_iter()
        .find_map(|block| match block {
            ResponseContentBlock::Text { text } => Some(text),
            ResponseContentBlock::Other => None,
        })
        .ok_or(BackendError::EmptyResponse)
}

// API request/response types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}
