//! OpenAI chat-completions provider

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::usage::TokenUsage;

use super::types::{
    ChatRequest, ChatResponse, ChatRole, FinishReason, ModelProvider, ResponseFormat,
};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Connect and total deadlines for one HTTP call
#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(60),
        }
    }
}

/// OpenAI provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        base_url: String,
        max_tokens: u32,
        timeouts: HttpTimeouts,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens,
        })
    }

    /// Convert a request to the OpenAI wire body
    fn to_openai_body(&self, request: &ChatRequest) -> OpenAiRequest {
        let mut messages = vec![OpenAiMessage {
            role: ChatRole::System.to_string(),
            content: request.system.clone(),
        }];
        messages.extend(
            request
                .messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .map(|m| OpenAiMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                }),
        );

        OpenAiRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            messages,
            response_format: match request.response_format {
                ResponseFormat::JsonObject => Some(OpenAiResponseFormat {
                    r#type: "json_object".to_string(),
                }),
                ResponseFormat::Text => None,
            },
        }
    }

    /// Convert OpenAI response to provider-agnostic format
    fn from_openai_response(resp: OpenAiApiResponse) -> Result<ChatResponse> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI response had no choices"))?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::MaxTokens,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        };

        let usage = resp.usage.map(|u| {
            let total = u
                .total_tokens
                .unwrap_or(u.prompt_tokens + u.completion_tokens);
            TokenUsage::with_total(u.prompt_tokens, u.completion_tokens, total)
        });

        Ok(ChatResponse {
            text: choice.message.content.unwrap_or_default(),
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.to_openai_body(request);

        debug!(
            "OpenAI request: model={}, messages={}, json={}",
            body.model,
            body.messages.len(),
            body.response_format.is_some()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAiApiResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI API response")?;

        debug!(
            "OpenAI response: choices={}, finish_reason={:?}",
            api_response.choices.len(),
            api_response.choices.first().map(|c| &c.finish_reason)
        );

        Self::from_openai_response(api_response)
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize)]
struct OpenAiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiResponseFormat {
    r#type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::ChatMessage;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(
            "sk-secret-key".to_string(),
            "https://api.openai.com/v1/".to_string(),
            1024,
            HttpTimeouts::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_body_puts_system_first() {
        let mut req = ChatRequest::new("gpt-4o-mini", "Voce e o Agente Triagem.").with_user("oi");
        req.messages.push(ChatMessage {
            role: ChatRole::System,
            content: "ignored".to_string(),
        });
        let body = provider().to_openai_body(&req);
        // system + user = 2
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[0].content, "Voce e o Agente Triagem.");
        assert_eq!(body.messages[1].role, "user");
        assert_eq!(body.max_tokens, 1024);
        assert!(body.response_format.is_none());
    }

    #[test]
    fn test_body_requests_json_object() {
        let req = ChatRequest::new("gpt-4o", "sys")
            .with_user("oi")
            .json()
            .with_max_tokens(300);
        let body = provider().to_openai_body(&req);
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["max_tokens"], 300);
        assert_eq!(value["model"], "gpt-4o");
    }

    #[test]
    fn test_from_openai_response_text() {
        let resp: OpenAiApiResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": "Ola!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }))
        .unwrap();
        let result = OpenAiProvider::from_openai_response(resp).unwrap();
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.text, "Ola!");
        assert_eq!(result.usage, Some(TokenUsage::with_total(10, 5, 15)));
    }

    #[test]
    fn test_from_openai_response_without_usage() {
        let resp: OpenAiApiResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": null}, "finish_reason": "length"}]
        }))
        .unwrap();
        let result = OpenAiProvider::from_openai_response(resp).unwrap();
        assert_eq!(result.finish_reason, FinishReason::MaxTokens);
        assert!(result.text.is_empty());
        assert!(result.usage.is_none());
    }

    #[test]
    fn test_from_openai_response_no_choices() {
        let resp = OpenAiApiResponse {
            choices: vec![],
            usage: None,
        };
        assert!(OpenAiProvider::from_openai_response(resp).is_err());
    }

    #[test]
    fn test_openai_provider_debug_hides_key() {
        let debug = format!("{:?}", provider());
        assert!(!debug.contains("sk-secret-key"));
        assert!(debug.contains("https://api.openai.com/v1"));
    }
}
