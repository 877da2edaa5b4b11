//! # Model Inference Service
//!
//! Trait and implementations for the LLM backend every agent talks to.
//!
//! - [`ModelProvider`] - `complete(request) -> Completion`, opaque errors
//! - [`OpenAIProvider`] - OpenAI-compatible Chat Completions over HTTP
//! - [`MockProvider`] - deterministic test provider (queues, rules, failures)
//!
//! The engine never retries a failed completion; errors surface as task failures.
//!
//! ```rust
//! use crewflow::config::EngineConfig;
//! use crewflow::provider::create_provider;
//!
//! let config = EngineConfig::default();
//! assert!(create_provider("mock", &config).is_ok());
//! assert!(create_provider("invalid", &config).is_err());
//! ```

mod mock;
mod openai;

pub use mock::MockProvider;
pub use openai::OpenAIProvider;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::CrewError;

/// Average characters per token for mixed content (prose + code)
const CHARS_PER_TOKEN_MIXED: f32 = 3.0;

/// Core trait all model backends implement
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g. "openai", "mock")
    fn name(&self) -> &str;

    /// Model used when neither the agent nor the engine config names one
    fn default_model(&self) -> &str;

    /// Generate a completion for one system + user prompt pair
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}

/// One inference call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: crate::crew::DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Combined prompt length in bytes
    pub fn prompt_len(&self) -> usize {
        self.system_prompt.len() + self.user_prompt.len()
    }
}

/// Generated text plus token usage
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage_tokens: u32,
}

impl Completion {
    pub fn new(content: impl Into<String>, usage_tokens: u32) -> Self {
        Self {
            content: content.into(),
            usage_tokens,
        }
    }

    /// Completion with usage estimated from text lengths
    ///
    /// For backends that don't report token counts.
    pub fn estimated(content: impl Into<String>, prompt_len: usize) -> Self {
        let content = content.into();
        let usage_tokens = estimate_tokens(prompt_len) + estimate_tokens(content.len());
        Self {
            content,
            usage_tokens,
        }
    }
}

/// Estimate tokens for `len` characters of mixed content
pub fn estimate_tokens(len: usize) -> u32 {
    (len as f32 / CHARS_PER_TOKEN_MIXED).ceil() as u32
}

/// Create a provider by name
///
/// | Name | Description | Requires |
/// |------|-------------|----------|
/// | `openai` | OpenAI-compatible API | API key (config or `OPENAI_API_KEY`) |
/// | `mock` | Testing | Nothing |
pub fn create_provider(
    name: &str,
    config: &EngineConfig,
) -> std::result::Result<Arc<dyn ModelProvider>, CrewError> {
    match name.to_lowercase().as_str() {
        "openai" => {
            let api_key = config
                .provider
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    CrewError::Provider(
                        "OpenAI API key not set (provider.api_key or OPENAI_API_KEY)".to_string(),
                    )
                })?;
            let mut provider = OpenAIProvider::with_api_key(api_key);
            if let Some(base_url) = &config.provider.base_url {
                provider = provider.with_base_url(base_url);
            }
            Ok(Arc::new(provider))
        }
        "mock" => Ok(Arc::new(MockProvider::new())),
        _ => Err(CrewError::Provider(format!(
            "Unknown provider: '{}'. Available: openai, mock",
            name
        ))),
    }
}
