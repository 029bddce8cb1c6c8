//! OpenAI-compatible synthesis backend.
//!
//! Works with any OpenAI-compatible chat completions API (vLLM, Ollama,
//! OpenAI, LocalAI, ...). The model is asked for a JSON object matching
//! [`Synthesis`].

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::traits::*;
use crate::prompt;

/// OpenAI-compatible synthesizer.
pub struct OpenAiSynthesizer {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiSynthesizer {
    /// Create a new OpenAI-compatible synthesizer.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SynthesisError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| SynthesisError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature: 0.3,
            timeout,
        })
    }

    /// Create a synthesizer pointing to Ollama.
    pub fn ollama(model: &str) -> Result<Self, SynthesisError> {
        Self::new("http://localhost:11434/v1", model, None, Duration::from_secs(60))
    }

    /// Create a synthesizer for the OpenAI API.
    pub fn openai(model: &str, api_key: impl Into<String>) -> Result<Self, SynthesisError> {
        Self::new(
            "https://api.openai.com/v1",
            model,
            Some(api_key.into()),
            Duration::from_secs(60),
        )
    }

    /// Set sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn auth_header(&self) -> Option<String> {
        self.api_key.as_ref().map(|k| format!("Bearer {}", k))
    }
}

/// OpenAI chat completion request body.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

/// OpenAI chat completion response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

/// Parse the model's JSON answer, tolerating a fenced code block.
pub(crate) fn parse_synthesis(content: &str) -> Result<Synthesis, SynthesisError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let synthesis: Synthesis =
        serde_json::from_str(body).map_err(|e| SynthesisError::ParseError(e.to_string()))?;
    synthesis.validate()?;
    Ok(synthesis)
}

#[async_trait]
impl TextSynthesizer for OpenAiSynthesizer {
    fn id(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let mut request = self.client.get(&url);

        if let Some(auth) = self.auth_header() {
            request = request.header(header::AUTHORIZATION, auth);
        }

        request
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn synthesize(&self, request: SynthesisRequest) -> Result<Synthesis, SynthesisError> {
        let chat_request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt::system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt::entries_prompt(&request),
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            stream: false,
        };

        debug!(
            model = %self.model,
            level = %request.level,
            entries = request.len(),
            "Requesting synthesis"
        );

        let mut http_request = self.client.post(self.chat_completions_url());

        if let Some(auth) = self.auth_header() {
            http_request = http_request.header(header::AUTHORIZATION, auth);
        }

        let response = http_request.json(&chat_request).send().await.map_err(|e| {
            if e.is_timeout() {
                SynthesisError::Timeout(self.timeout.as_millis() as u64)
            } else {
                SynthesisError::Unavailable(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(SynthesisError::RateLimited { retry_after_ms: None });
            }

            return Err(SynthesisError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::ParseError(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SynthesisError::ParseError("No content in response".to_string()))?;

        parse_synthesis(&content)
    }
}
