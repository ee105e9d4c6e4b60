//! Configuration types for judgment analysis.
//!
//! Every knob lives in [`AnalysisConfig`], built via its
//! [`AnalysisConfigBuilder`]. The stage-specific groups
//! ([`ExtractionConfig`], [`ChunkingConfig`], [`RetryPolicy`]) are plain
//! `Copy` values so each stage can take just the part it needs.

use crate::error::AnalysisError;
use crate::pipeline::retry::RetryPolicy;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Knobs for the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Minimum average characters per page for the digital text layer to be
    /// trusted. Below `min_text_length × pages` the extractor falls back to OCR.
    pub min_text_length: usize,

    /// Rendering DPI for OCR rasterisation. Range: 72–600. Default: 300.
    pub ocr_dpi: u32,

    /// Cap on either rendered dimension, in pixels. Default: 4000.
    pub max_rendered_pixels: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_length: 50,
            ocr_dpi: 300,
            max_rendered_pixels: 4000,
        }
    }
}

/// Knobs for the chunker. All sizes are in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// A paragraph at or under this size becomes a single chunk.
    pub max_chunk_size: usize,
    /// Sentence pull-back never shortens a window below this.
    pub min_chunk_size: usize,
    /// Characters shared by consecutive windows of one paragraph.
    pub overlap_size: usize,
    /// How far back from a window end to look for sentence punctuation.
    pub sentence_search_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            min_chunk_size: 200,
            overlap_size: 100,
            sentence_search_window: 200,
        }
    }
}

impl ChunkingConfig {
    /// Check the size relations the window algorithm depends on.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.overlap_size == 0 {
            return Err(AnalysisError::InvalidConfig("overlap_size must be ≥ 1".into()));
        }
        if self.overlap_size >= self.min_chunk_size {
            return Err(AnalysisError::InvalidConfig(format!(
                "overlap_size ({}) must be smaller than min_chunk_size ({})",
                self.overlap_size, self.min_chunk_size
            )));
        }
        if self.min_chunk_size >= self.max_chunk_size {
            return Err(AnalysisError::InvalidConfig(format!(
                "min_chunk_size ({}) must be smaller than max_chunk_size ({})",
                self.min_chunk_size, self.max_chunk_size
            )));
        }
        Ok(())
    }
}

/// Configuration for a full judgment analysis.
///
/// Built via [`AnalysisConfig::builder()`] or [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use judgment_analyzer::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .max_attempts(4)
///     .max_chunks_per_step(8)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.retry.max_attempts, 4);
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    pub extraction: ExtractionConfig,
    pub chunking: ChunkingConfig,
    pub retry: RetryPolicy,

    /// Upper bound on chunks sent to a single step. Default: 10.
    pub max_chunks_per_step: usize,

    /// Sampling temperature for step generations. Default: 0.1.
    ///
    /// Structured extraction wants the model to stay close to the text.
    pub temperature: f32,

    /// Maximum tokens a step may generate. Default: 4096.
    pub max_tokens: usize,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Optional progress events sink.
    pub progress_callback: Option<ProgressCallback>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-generation-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            chunking: ChunkingConfig::default(),
            retry: RetryPolicy::default(),
            max_chunks_per_step: 10,
            temperature: 0.1,
            max_tokens: 4096,
            model: None,
            provider_name: None,
            provider: None,
            progress_callback: None,
            download_timeout_secs: 120,
            api_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("extraction", &self.extraction)
            .field("chunking", &self.chunking)
            .field("retry", &self.retry)
            .field("max_chunks_per_step", &self.max_chunks_per_step)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn min_text_length(mut self, n: usize) -> Self {
        self.config.extraction.min_text_length = n;
        self
    }

    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.extraction.ocr_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.extraction.max_rendered_pixels = px.max(100);
        self
    }

    pub fn chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.config.chunking = chunking;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay_ms = ms;
        self
    }

    pub fn max_chunks_per_step(mut self, n: usize) -> Self {
        self.config.max_chunks_per_step = n.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, AnalysisError> {
        let c = &self.config;
        c.chunking.validate()?;
        if c.max_chunks_per_step == 0 {
            return Err(AnalysisError::InvalidConfig(
                "max_chunks_per_step must be ≥ 1".into(),
            ));
        }
        if c.retry.max_attempts == 0 {
            return Err(AnalysisError::InvalidConfig("max_attempts must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}
