//! Model router with failover across providers

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::{ChatRequest, ChatResponse, ModelProvider};

/// Routes requests across providers in order, moving on after a failure.
///
/// One attempt per provider unless [`ModelRouter::with_max_retries`] says otherwise.
pub struct ModelRouter {
    /// Providers in failover order (index 0 = primary)
    providers: Vec<Box<dyn ModelProvider>>,
    /// Attempts per provider before moving to the next
    max_retries_per_provider: u32,
    /// Base delay for exponential backoff
    base_retry_delay: Duration,
}

impl ModelRouter {
    /// Router with a single provider (no failover)
    pub fn single(provider: Box<dyn ModelProvider>) -> Self {
        Self {
            providers: vec![provider],
            max_retries_per_provider: 1,
            base_retry_delay: Duration::from_millis(500),
        }
    }

    /// Router with multiple providers in failover order
    pub fn with_failover(providers: Vec<Box<dyn ModelProvider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(anyhow!("ModelRouter requires at least one provider"));
        }
        Ok(Self {
            providers,
            max_retries_per_provider: 1,
            base_retry_delay: Duration::from_millis(500),
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries_per_provider = max_retries.max(1);
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    /// Number of configured providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl ModelProvider for ModelRouter {
    /// Primary provider's name
    fn provider_name(&self) -> &str {
        self.providers
            .first()
            .map(|p| p.provider_name())
            .unwrap_or("unknown")
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut last_error = None;

        for (idx, provider) in self.providers.iter().enumerate() {
            match self.call_with_backoff(provider.as_ref(), request).await {
                Ok(response) => {
                    if idx > 0 {
                        info!(
                            "{} answered model {} after {} provider(s) failed",
                            provider.provider_name(),
                            request.model,
                            idx
                        );
                    }
                    return Ok(response);
                }
                Err(e) => last_error = Some(e),
            }
            if let Some(next) = self.providers.get(idx + 1) {
                info!(
                    "Model {}: switching from {} to {}",
                    request.model,
                    provider.provider_name(),
                    next.provider_name()
                );
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("no provider could serve model {}", request.model)))
    }
}

impl ModelRouter {
    /// Up to `max_retries_per_provider` attempts on one provider, doubling the
    /// pause between them. A non-retryable error ends the attempts at once.
    async fn call_with_backoff(
        &self,
        provider: &dyn ModelProvider,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        let mut delay = self.base_retry_delay;
        let mut attempt = 1;
        loop {
            debug!(
                "{} <- model {} (try {} of {})",
                provider.provider_name(),
                request.model,
                attempt,
                self.max_retries_per_provider
            );
            let err = match provider.chat(request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            let retryable = is_retryable_error(&err.to_string());
            warn!(
                "{} rejected model {} on try {}: {:#}{}",
                provider.provider_name(),
                request.model,
                attempt,
                err,
                if retryable { "" } else { " (not retryable)" }
            );
            if !retryable || attempt >= self.max_retries_per_provider {
                return Err(err);
            }

            tokio::time::sleep(delay).await;
            delay *= 2;
            attempt += 1;
        }
    }
}

/// Rate limit, server error, or timeout
fn is_retryable_error(err: &str) -> bool {
    let retryable_patterns = [
        "429",
        "500",
        "502",
        "503",
        "504",
        "rate limit",
        "rate_limit",
        "overloaded",
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
        "temporarily unavailable",
    ];
    let lower = err.to_lowercase();
    retryable_patterns.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::super::types::FinishReason;
    use crate::usage::TokenUsage;

    struct SuccessProvider {
        name: String,
    }

    #[async_trait]
    impl ModelProvider for SuccessProvider {
        fn provider_name(&self) -> &str {
            &self.name
        }
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                text: format!("from {}", self.name),
                finish_reason: FinishReason::Stop,
                usage: Some(TokenUsage::new(10, 5)),
            })
        }
    }

    struct FailProvider {
        name: String,
        error: String,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ModelProvider for FailProvider {
        fn provider_name(&self) -> &str {
            &self.name
        }
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("{}", self.error))
        }
    }

    fn fail(name: &str, error: &str) -> (Box<dyn ModelProvider>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = FailProvider {
            name: name.to_string(),
            error: error.to_string(),
            calls: calls.clone(),
        };
        (Box::new(provider), calls)
    }

    fn request() -> ChatRequest {
        ChatRequest::new("gpt-4o-mini", "system").with_user("oi")
    }

    #[tokio::test]
    async fn test_single_provider_success() {
        let router = ModelRouter::single(Box::new(SuccessProvider {
            name: "openai".to_string(),
        }));
        let result = router.chat(&request()).await.unwrap();
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.text, "from openai");
    }

    #[tokio::test]
    async fn test_failover_to_second_provider() {
        let (primary, calls) = fail("primary", "status 500: server error");
        let router = ModelRouter::with_failover(vec![
            primary,
            Box::new(SuccessProvider {
                name: "fallback".to_string(),
            }),
        ])
        .unwrap();

        let result = router.chat(&request()).await.unwrap();
        assert_eq!(result.text, "from fallback");
        // no same-provider retry by default
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_when_enabled() {
        let (primary, calls) = fail("primary", "status 503: unavailable");
        let router = ModelRouter::single(primary)
            .with_max_retries(3)
            .with_base_retry_delay(Duration::from_millis(1));

        assert!(router.chat(&request()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_skips_retries() {
        let (primary, calls) = fail("primary", "status 401: unauthorized");
        let router = ModelRouter::with_failover(vec![
            primary,
            Box::new(SuccessProvider {
                name: "fallback".to_string(),
            }),
        ])
        .unwrap()
        .with_max_retries(3)
        .with_base_retry_delay(Duration::from_millis(1));

        let result = router.chat(&request()).await.unwrap();
        assert_eq!(result.text, "from fallback");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let (a, _) = fail("a", "auth error 401");
        let (b, _) = fail("b", "auth error 401");
        let router = ModelRouter::with_failover(vec![a, b]).unwrap();

        let err = router.chat(&request()).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_empty_providers_rejected() {
        assert!(ModelRouter::with_failover(vec![]).is_err());
    }

    #[test]
    fn test_name_and_count() {
        let router = ModelRouter::single(Box::new(SuccessProvider {
            name: "openai".to_string(),
        }));
        assert_eq!(router.provider_name(), "openai");
        assert_eq!(router.provider_count(), 1);
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error("status 429: rate limit exceeded"));
        assert!(is_retryable_error("status 500: internal server error"));
        assert!(is_retryable_error("request timed out"));
        assert!(is_retryable_error("API overloaded"));
        assert!(!is_retryable_error("status 401: unauthorized"));
        assert!(!is_retryable_error("invalid API key"));
    }
}
