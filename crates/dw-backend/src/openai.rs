//! OpenAI chat completions client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::{build_http_client, check_status};
use crate::prompt::{user_message, SYSTEM_PROMPT};
use crate::{BackendError, Suggester};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI (or compatible) chat completions client.
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    http: Client,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, BackendError> {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http: build_http_client()?,
        })
    }

    /// Point the client at a compatible endpoint (e.g. a local gateway).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Send a system prompt and user message, returning the first choice's text.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, BackendError> {
        let body = build_request(&self.model, system_prompt, user_message);

        debug!(backend = "openai", model = %self.model, "sending request");
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let response = check_status(response).await?;
        let resp: ChatResponse = response.json().await?;
        extract_text(resp)
    }
}

#[async_trait]
impl Suggester for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn suggest(&self, line: &str) -> Result<String, BackendError> {
        let text = self.complete(SYSTEM_PROMPT, user_message(line)).await?;
        Ok(text.trim().to_string())
    }
}

fn build_request(model: &str, system_prompt: &str, user_message: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        temperature: 0.0,
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: system_prompt.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user_message.to_string(),
            },
        ],
    }
}

fn extract_text(resp: ChatResponse) -> Result<String, BackendError> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(BackendError::EmptyResponse)
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
