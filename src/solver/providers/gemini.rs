//! Google Gemini `generateContent` backend

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::openai::truncate;
use super::prompt::{self, SelectionMode};
use super::{GridRequest, ProviderCapacity, ProviderError, VisionProvider, http_client, parse};
use crate::config::ProviderConfig;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

pub struct GeminiProvider {
    name: String,
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    timeout: Duration,
    capacity: ProviderCapacity,
}

impl GeminiProvider {
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

        let mut parts: Vec<Value> = request
            .images
            .iter()
            .map(|image| {
                json!({ "inline_data": { "mime_type": image.format.mime(), "data": image.data } })
            })
            .collect();
        parts.push(json!({ "text": prompt::user_prompt(request) }));

        json!({
            "systemInstruction": { "parts": [{ "text": prompt::system_prompt(mode) }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": 0.1,
                "maxOutputTokens": self.max_tokens,
                "responseMimeType": "application/json",
            },
        })
    }
}

#[async_trait]
impl VisionProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capacity(&self) -> ProviderCapacity {
        self.capacity
    }

    async fn select_tiles(&self, request: &GridRequest) -> Result<Vec<u32>, ProviderError> {
        debug!(provider = %self.name, model = %self.model, images = request.images.len(), "Calling generateContent");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
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

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let text = reply_text(generated)?;

        parse::decode_tiles(&text, request.rows, request.columns).map_err(ProviderError::Malformed)
    }
}

fn reply_text(generated: GenerateResponse) -> Result<String, ProviderError> {
    let text: String = generated
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = generated
            .prompt_feedback
            .map(|feedback| feedback.to_string())
            .unwrap_or_else(|| "no candidates".to_string());
        return Err(ProviderError::Malformed(format!("empty reply ({reason})")));
    }
    Ok(text)
}
