//! OpenAI-compatible Chat Completions backend (OpenAI, Together, OpenRouter)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::prompt::{self, SelectionMode};
use super::{GridRequest, ProviderCapacity, ProviderError, VisionProvider, http_client, parse};
use crate::config::ProviderConfig;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiProvider {
    name: String,
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    timeout: Duration,
    capacity: ProviderCapacity,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig, api_key: String) -> Result<Self, ProviderError> {
        Ok(Self {
            name: config.name.clone(),
            client: http_client(config.timeout.get())?,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            timeout: config.timeout.get(),
            capacity: ProviderCapacity::from(config),
        })
    }

    fn build_body(&self, request: &GridRequest) -> Value {
        let mode = SelectionMode::detect(&request.instructions);

        let mut content = vec![json!({ "type": "text", "text": prompt::user_prompt(request) })];
        content.extend(request.images.iter().map(|image| {
            json!({ "type": "image_url", "image_url": { "url": image.data_url() } })
        }));

        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt::system_prompt(mode) },
                { "role": "user", "content": content },
            ],
            "temperature": 0.1,
            "max_tokens": self.max_tokens,
        })
    }
}

#[async_trait]
impl VisionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capacity(&self) -> ProviderCapacity {
        self.capacity
    }

    async fn select_tiles(&self, request: &GridRequest) -> Result<Vec<u32>, ProviderError> {
        debug!(provider = %self.name, model = %self.model, images = request.images.len(), "Calling chat completions");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let content = reply_text(chat)?;

        parse::decode_tiles(&content, request.rows, request.columns).map_err(ProviderError::Malformed)
    }
}

fn reply_text(chat: ChatResponse) -> Result<String, ProviderError> {
    chat.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ProviderError::Malformed("response has no message content".to_string()))
}

pub(crate) fn truncate(body: &str) -> String {
    const LIMIT: usize = 300;
    if body.len() <= LIMIT {
        return body.to_string();
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
