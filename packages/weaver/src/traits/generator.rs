//! Generator trait for the external text-generation capability.
//!
//! The model behind a `Generator` is untrusted: implementations return raw
//! text and make no promise that it is JSON, let alone schema-valid. All
//! parsing and validation happens in [`crate::attempt`].

use async_trait::async_trait;
use std::time::Duration;

use crate::error::InferenceResult;

/// One stateless completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// System message
    pub system: String,

    /// User message
    pub prompt: String,

    /// Sampling temperature (0 = greedy)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Upper bound on the call, enforced by the inference handle
    pub timeout: Duration,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.2,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Text-generation capability.
///
/// Implementations wrap a concrete backend (a local inference server, an
/// OpenAI-compatible API, a mock). They need not be re-entrant: callers go
/// through [`InferenceHandle`](crate::inference::InferenceHandle), which
/// serializes every call.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete one request and return the raw model text.
    async fn generate(&self, request: &GenerationRequest) -> InferenceResult<String>;

    /// Release backend resources. Called once by the handle's teardown.
    async fn shutdown(&self) -> InferenceResult<()> {
        Ok(())
    }

    /// Backend name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}
