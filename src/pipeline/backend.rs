//! The generation backend seam.
//!
//! [`GenerationBackend`] is a stateless request/response contract: system
//! instructions and user content in, text and token usage out. The
//! orchestrator only ever talks to this trait, so a live model
//! ([`LlmBackend`]) and the deterministic offline generator
//! ([`crate::pipeline::offline::OfflineBackend`]) are interchangeable.

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, GenerationError};
use crate::model::TokenUsage;
use crate::prompts::JSON_ONLY_DIRECTIVE;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Shape of the output the caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    /// A single JSON object.
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_instructions: String,
    pub user_content: String,
    pub response_format: ResponseFormat,
    pub temperature: f32,
    /// Maximum tokens the backend may generate.
    pub max_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// Anything that can answer a [`GenerationRequest`].
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Recorded on every step result, e.g. `openai:gpt-4.1-mini`.
    fn identifier(&self) -> String;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError>;
}

/// A live model reached through an `edgequake_llm` provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    identifier: String,
    call_timeout: Duration,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, identifier: impl Into<String>) -> Self {
        Self {
            provider,
            identifier: identifier.into(),
            call_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Build a backend from the provider settings in `config`.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let (provider, identifier) = resolve_provider(config)?;
        Ok(Self::new(provider, identifier).with_timeout(Duration::from_secs(config.api_timeout_secs)))
    }
}

#[async_trait]
impl GenerationBackend for LlmBackend {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        let start = Instant::now();
        let mut system = request.system_instructions.clone();
        if request.response_format == ResponseFormat::Json {
            system.push_str("\n\n");
            system.push_str(JSON_ONLY_DIRECTIVE);
        }

        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(request.user_content.clone()),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = timeout(self.call_timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| {
                GenerationError::Transient(format!(
                    "call timed out after {}s",
                    self.call_timeout.as_secs()
                ))
            })?
            .map_err(|e| GenerationError::classify(e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.identifier,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(GenerationResponse {
            text: response.content,
            usage: TokenUsage {
                prompt_tokens: response.prompt_tokens as u64,
                completion_tokens: response.completion_tokens as u64,
            },
        })
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, AnalysisError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AnalysisError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` (+ `config.model`).
/// 3. `JUDGMENT_LLM_PROVIDER` + `JUDGMENT_MODEL` environment pair.
/// 4. OpenAI when `OPENAI_API_KEY` is set.
/// 5. `ProviderFactory::from_env()` auto-detection.
///
/// Returns the provider with the identifier recorded on step results.
pub fn resolve_provider(config: &AnalysisConfig) -> Result<(Arc<dyn LLMProvider>, String), AnalysisError> {
    let default_model = "gpt-4.1-mini";

    if let Some(ref provider) = config.provider {
        let id = match (&config.provider_name, &config.model) {
            (Some(name), Some(model)) => format!("{name}:{model}"),
            (None, Some(model)) => format!("custom:{model}"),
            (Some(name), None) => name.clone(),
            (None, None) => "custom".to_string(),
        };
        return Ok((Arc::clone(provider), id));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model);
        return Ok((create_provider(name, model)?, format!("{name}:{model}")));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("JUDGMENT_LLM_PROVIDER"),
        std::env::var("JUDGMENT_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return Ok((create_provider(&prov, &model)?, format!("{prov}:{model}")));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(default_model);
            return Ok((create_provider("openai", model)?, format!("openai:{model}")));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AnalysisError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or use --offline.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, "auto".to_string()))
}
