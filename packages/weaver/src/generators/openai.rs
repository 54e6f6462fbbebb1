//! OpenAI-compatible chat-completions generator.
//!
//! Talks to anything serving `POST {base_url}/chat/completions`: a local
//! vLLM/llama.cpp server hosting the default model, or a hosted API.
//!
//! Requires the `openai` feature to be enabled.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ApiKey, ScraperConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::error::{InferenceError, InferenceResult};
use crate::traits::generator::{GenerationRequest, Generator};

/// Generator backed by an OpenAI-compatible HTTP API.
///
/// # Example
///
/// ```rust,ignore
/// use weaver::generators::OpenAiGenerator;
/// use weaver::InferenceHandle;
///
/// let generator = OpenAiGenerator::new("Qwen/Qwen2.5-7B-Instruct-1M")
///     .with_base_url("http://localhost:8000/v1");
/// let handle = InferenceHandle::new(generator);
/// ```
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: Client,
    model: String,
    base_url: String,
    api_key: Option<ApiKey>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
        }
    }

    /// Model, endpoint and key from a scraper configuration.
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            client: Client::new(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(key));
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

impl Default for OpenAiGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> InferenceResult<String> {
        let start = std::time::Instant::now();

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(request.timeout)
            .json(&self.body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose());
        }

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, base_url = %self.base_url, "Chat completion request failed");
            if e.is_timeout() {
                InferenceError::Timeout(request.timeout)
            } else if e.is_connect() {
                InferenceError::Unavailable(e.to_string())
            } else {
                InferenceError::Backend(Box::new(e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Chat completion API error");
            return Err(InferenceError::Backend(
                format!("API error {}: {}", status, error_text).into(),
            ));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Backend(Box::new(e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InferenceError::Backend("response contained no choices".into()))?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis(),
            chars = content.len(),
            "Chat completion finished"
        );

        Ok(content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let generator = OpenAiGenerator::new("test-model");
        let request = GenerationRequest::new("be terse", "extract this")
            .with_temperature(0.0)
            .with_max_tokens(256);

        let body = serde_json::to_value(generator.body(&request)).unwrap();

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be terse");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn test_from_config() {
        let config = ScraperConfig::new()
            .with_model("llama3")
            .with_base_url("http://gpu-box:8080/v1/")
            .with_api_key("sk-local");

        let generator = OpenAiGenerator::from_config(&config);

        assert_eq!(generator.model(), "llama3");
        assert_eq!(generator.base_url, "http://gpu-box:8080/v1");
        assert_eq!(generator.api_key.as_ref().map(ApiKey::expose), Some("sk-local"));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"<json>{}</json>"}}]}"#;
        let body: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.choices[0].message.content.as_deref(), Some("<json>{}</json>"));
    }
}
