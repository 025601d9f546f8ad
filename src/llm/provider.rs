use crate::types::{AppError, AppResult, LLMProvider, LLMRequest, LLMResponse};
use crate::utils::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

/// Configuration for an LLM provider
pub struct LLMProviderConfig {
    pub provider: LLMProvider,
    pub api_key: String,
    pub api_base: Option<String>,
    pub max_retries: u32,
}

impl LLMProviderConfig {
    pub fn from_config(config: &crate::config::LLMConfig) -> Option<Self> {
        Some(Self {
            provider: config.provider,
            api_key: config.active_api_key()?,
            api_base: config.api_base.clone(),
            max_retries: config.max_retries,
        })
    }
}

/// Provider-selecting LLM client. Retries transient failures before giving
/// up; callers see a single call that either succeeds or fails.
pub struct LLM {
    adapter: Box<dyn LLMAdapter>,
    provider: LLMProvider,
    retry: RetryPolicy,
}

impl LLM {
    pub fn new(config: LLMProviderConfig) -> Self {
        let api_key = config.api_key.as_str();
        let adapter: Box<dyn LLMAdapter> = match (config.provider, config.api_base.as_deref()) {
            (_, Some(base)) => {
                Box::new(crate::llm::openai::OpenAIAdapter::new_with_api_base(api_key, base))
            }
            (LLMProvider::OpenAI, None) => Box::new(crate::llm::openai::OpenAIAdapter::new(api_key)),
            (LLMProvider::Groq, None) => Box::new(crate::llm::groq::GroqAdapter::new(api_key)),
            (LLMProvider::OpenRouter, None) => Box::new(crate::llm::openrouter::OpenRouterAdapter::new(api_key)),
        };

        Self {
            adapter,
            provider: config.provider,
            retry: RetryPolicy::new(config.max_retries),
        }
    }

    /// Wrap an existing adapter (custom gateways, tests)
    pub fn with_adapter(adapter: Box<dyn LLMAdapter>, provider: LLMProvider, retry: RetryPolicy) -> Self {
        Self {
            adapter,
            provider,
            retry,
        }
    }

    pub fn provider(&self) -> LLMProvider {
        self.provider
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        debug!(provider = %self.provider, model = %request.model, "Sending chat completion");
        with_retry(self.retry, AppError::is_transient, || {
            self.adapter.create_chat_completion(request)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenUsage;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct FlakyAdapter {
        failures: u32,
        status: u16,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl LLMAdapter for FlakyAdapter {
        async fn create_chat_completion(&self, _request: &LLMRequest) -> AppResult<LLMResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(AppError::LLMStatus {
                    status: self.status,
                    message: "upstream said no".to_string(),
                });
            }
            Ok(LLMResponse {
                content: Some("ok".to_string()),
                tool_calls: vec![],
                finish_reason: "stop".to_string(),
                usage: TokenUsage::default(),
            })
        }
    }

    fn request() -> LLMRequest {
        LLMRequest {
            model: "gpt-4o".to_string(),
            messages: vec![],
            max_tokens: None,
            temperature: None,
            system_instruction: None,
            tools: vec![],
            tool_choice: None,
        }
    }

    #[tokio::test]
    async fn test_llm_retries_backend_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let llm = LLM::with_adapter(
            Box::new(FlakyAdapter {
                failures: 2,
                status: 503,
                calls: calls.clone(),
            }),
            LLMProvider::OpenAI,
            RetryPolicy::new(2).with_base_delay(Duration::from_millis(1)),
        );

        let response = llm.create_chat_completion(&request()).await.unwrap();
        assert_eq!(response.content.as_deref(), Some("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_llm_surfaces_error_when_retries_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let llm = LLM::with_adapter(
            Box::new(FlakyAdapter {
                failures: 5,
                status: 503,
                calls: calls.clone(),
            }),
            LLMProvider::OpenAI,
            RetryPolicy::new(0),
        );

        let err = tokio_test::block_on(llm.create_chat_completion(&request())).unwrap_err();
        assert!(matches!(err, AppError::LLMStatus { status: 503, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_llm_does_not_retry_client_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let llm = LLM::with_adapter(
            Box::new(FlakyAdapter {
                failures: 5,
                status: 401,
                calls: calls.clone(),
            }),
            LLMProvider::OpenAI,
            RetryPolicy::new(3).with_base_delay(Duration::from_millis(1)),
        );

        let err = llm.create_chat_completion(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::LLMStatus { status: 401, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(llm.provider(), LLMProvider::OpenAI);
    }
}
