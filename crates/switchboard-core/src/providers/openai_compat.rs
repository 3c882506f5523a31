//! OpenAI-compatible provider for Ollama, Groq, Together, LM Studio, etc.
//!
//! Reuses the OpenAI wire format with a configurable base URL.

use anyhow::Result;
use async_trait::async_trait;

use super::openai::{HttpTimeouts, OpenAiProvider};
use super::types::{ChatRequest, ChatResponse, ModelProvider};

/// Wraps [`OpenAiProvider`] with a custom name
pub struct OpenAiCompatProvider {
    inner: OpenAiProvider,
    name: String,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("name", &self.name)
            .field("inner", &self.inner)
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// - `name`: label used in logs (e.g. "ollama", "groq")
    /// - `base_url`: the endpoint root including the version (e.g. `http://localhost:11434/v1`)
    pub fn new(
        name: String,
        api_key: String,
        base_url: String,
        max_tokens: u32,
        timeouts: HttpTimeouts,
    ) -> Result<Self> {
        Ok(Self {
            inner: OpenAiProvider::new(api_key, base_url, max_tokens, timeouts)?,
            name,
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.inner.chat(request).await
    }
}
