//! Eager (whole-judgment) analysis entry points.
//!
//! [`Analyzer`] wires the three stages together (extractor, chunker,
//! step orchestrator) around one [`GenerationBackend`]. The free functions
//! ([`analyze_file`], [`analyze_bytes`], [`extract_only`], [`inspect`])
//! build an analyzer from an [`AnalysisConfig`] and wait for the result.
//! Use [`crate::jobs::JobRunner`] instead to run in the background and
//! report through a status sink.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::model::{
    ChunkingResult, CompleteAnalysisResult, DocumentMetadata, ExtractionMethod, ExtractionResult, JudgmentAnalysis,
    JudgmentChunk,
};
use crate::pipeline::backend::{resolve_provider, GenerationBackend, LlmBackend};
use crate::pipeline::chunk::JudgmentChunker;
use crate::pipeline::extract::{select_method, Extractor};
use crate::pipeline::input;
use crate::pipeline::ocr::VisionOcrEngine;
use crate::pipeline::offline::OfflineBackend;
use crate::pipeline::orchestrator::StepOrchestrator;
use crate::pipeline::steps::{default_steps, StepDescriptor};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Extractor, chunker and orchestrator bound to one backend.
#[derive(Clone)]
pub struct Analyzer {
    config: AnalysisConfig,
    extractor: Extractor,
    backend: Arc<dyn GenerationBackend>,
    steps: Vec<StepDescriptor>,
}

impl Analyzer {
    /// Analyzer over `backend` with the default steps and an extractor
    /// without OCR. Add OCR with [`Analyzer::with_extractor`].
    pub fn new(config: AnalysisConfig, backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            extractor: Extractor::new(config.extraction),
            config,
            backend,
            steps: default_steps(),
        }
    }

    /// Live analyzer: the configured LLM provider answers the steps and
    /// transcribes scanned pages.
    pub fn from_config(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let (provider, identifier) = resolve_provider(&config)?;
        let timeout = Duration::from_secs(config.api_timeout_secs);
        let backend = LlmBackend::new(Arc::clone(&provider), identifier).with_timeout(timeout);
        let ocr = VisionOcrEngine::new(provider)
            .with_max_tokens(config.max_tokens)
            .with_timeout(timeout);
        let extractor = Extractor::new(config.extraction).with_ocr_engine(Arc::new(ocr));
        Ok(Self::new(config, Arc::new(backend)).with_extractor(extractor))
    }

    /// Offline analyzer: the deterministic placeholder generator answers the
    /// steps. OCR is still available when a provider can be resolved.
    pub fn offline(config: AnalysisConfig) -> Self {
        let extractor = extractor_with_optional_ocr(&config);
        Self::new(config, Arc::new(OfflineBackend::new())).with_extractor(extractor)
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_steps(mut self, steps: Vec<StepDescriptor>) -> Self {
        self.steps = steps;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn backend_identifier(&self) -> String {
        self.backend.identifier()
    }

    /// Extraction phase.
    pub async fn extract(&self, bytes: &[u8], cancel: &CancellationToken) -> Result<ExtractionResult, AnalysisError> {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start();
        }
        let start = Instant::now();
        let extraction = self.extractor.extract(bytes, cancel).await?;
        info!(
            "Extracted {} pages ({}) in {}ms",
            extraction.total_pages,
            extraction.extraction_method.as_str(),
            start.elapsed().as_millis()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(extraction.total_pages, extraction.extraction_method);
        }
        Ok(extraction)
    }

    /// Chunking phase.
    pub fn chunk(&self, judgment_id: &str, extraction: &ExtractionResult) -> ChunkingResult {
        let chunking = JudgmentChunker::new(judgment_id, self.config.chunking).chunk_pages(&extraction.pages);
        info!(
            "Chunked into {} chunks over {} paragraphs (avg {} chars)",
            chunking.total_chunks, chunking.statistics.total_paragraphs, chunking.statistics.average_chunk_size
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_chunking_complete(chunking.total_chunks);
        }
        chunking
    }

    /// Analysis phase: every step, in order.
    pub async fn analyze_chunks(
        &self,
        chunks: &[JudgmentChunk],
        cancel: &CancellationToken,
    ) -> Result<CompleteAnalysisResult, AnalysisError> {
        let mut orchestrator = StepOrchestrator::from_config(Arc::clone(&self.backend), &self.config);
        Ok(orchestrator.run(chunks, &self.steps, cancel).await?)
    }

    /// Extract, chunk and analyse one judgment.
    pub async fn analyze_bytes(
        &self,
        judgment_id: &str,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<JudgmentAnalysis, AnalysisError> {
        let total_start = Instant::now();
        info!("Analysing judgment '{}' with {}", judgment_id, self.backend.identifier());

        let extraction = self.extract(bytes, cancel).await?;
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        let chunking = self.chunk(judgment_id, &extraction);
        if chunking.chunks.is_empty() {
            warn!("Judgment '{}' produced no chunks; steps will see no excerpts", judgment_id);
        }
        let analysis = self.analyze_chunks(&chunking.chunks, cancel).await?;

        info!(
            "Judgment '{}' analysed: {} steps, {} tokens, {}ms",
            judgment_id,
            analysis.steps.len(),
            analysis.total_tokens_used,
            total_start.elapsed().as_millis()
        );

        Ok(JudgmentAnalysis {
            judgment_id: judgment_id.to_string(),
            extraction,
            chunking,
            analysis,
        })
    }
}

/// Extractor with vision OCR when a provider resolves, else without.
fn extractor_with_optional_ocr(config: &AnalysisConfig) -> Extractor {
    let extractor = Extractor::new(config.extraction);
    match resolve_provider(config) {
        Ok((provider, _)) => extractor.with_ocr_engine(Arc::new(
            VisionOcrEngine::new(provider).with_timeout(Duration::from_secs(config.api_timeout_secs)),
        )),
        Err(e) => {
            info!("No OCR provider available, scanned judgments will fail: {}", e);
            extractor
        }
    }
}

/// Analyse a judgment already in memory with the live provider from `config`.
pub async fn analyze_bytes(
    judgment_id: &str,
    bytes: &[u8],
    config: &AnalysisConfig,
) -> Result<JudgmentAnalysis, AnalysisError> {
    Analyzer::from_config(config.clone())?
        .analyze_bytes(judgment_id, bytes, &CancellationToken::new())
        .await
}

/// Analyse a judgment from a local path or HTTP(S) URL.
///
/// The judgment id defaults to the file stem (or last URL segment).
pub async fn analyze_file(input: impl AsRef<str>, config: &AnalysisConfig) -> Result<JudgmentAnalysis, AnalysisError> {
    let loaded = input::load_input(input.as_ref(), config.download_timeout_secs).await?;
    analyze_bytes(&loaded.name, &loaded.bytes, config).await
}

/// Analyse and write the result as pretty JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn analyze_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &AnalysisConfig,
) -> Result<JudgmentAnalysis, AnalysisError> {
    let analysis = analyze_file(input, config).await?;
    write_json_atomic(output_path.as_ref(), &analysis).await?;
    Ok(analysis)
}

/// Synchronous wrapper around [`analyze_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync(input: impl AsRef<str>, config: &AnalysisConfig) -> Result<JudgmentAnalysis, AnalysisError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnalysisError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze_file(input, config))
}

/// Serialise `value` as pretty JSON and move it into place atomically.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), AnalysisError> {
    let write_failed = |source: std::io::Error| AnalysisError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_vec_pretty(value).map_err(|e| AnalysisError::Internal(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}

/// Extract per-page text without any generation step.
///
/// OCR is used for scanned judgments when a provider can be resolved.
pub async fn extract_only(input: impl AsRef<str>, config: &AnalysisConfig) -> Result<ExtractionResult, AnalysisError> {
    let loaded = input::load_input(input.as_ref(), config.download_timeout_secs).await?;
    let extractor = extractor_with_optional_ocr(config);
    Ok(extractor.extract(&loaded.bytes, &CancellationToken::new()).await?)
}

/// What [`inspect`] reports about a judgment without running OCR or steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectReport {
    pub name: String,
    pub page_count: usize,
    pub text_layer_chars: usize,
    /// The method [`extract_only`] would choose.
    pub extraction_method: ExtractionMethod,
    pub metadata: Option<DocumentMetadata>,
}

/// Read page count, document info and text-layer density.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(input: impl AsRef<str>, config: &AnalysisConfig) -> Result<InspectReport, AnalysisError> {
    let loaded = input::load_input(input.as_ref(), config.download_timeout_secs).await?;
    let layer = Extractor::new(config.extraction).read_text_layer(&loaded.bytes).await?;
    let text_layer_chars = layer.text.trim().chars().count();
    Ok(InspectReport {
        name: loaded.name,
        page_count: layer.page_count,
        text_layer_chars,
        extraction_method: select_method(text_layer_chars, layer.page_count, config.extraction.min_text_length),
        metadata: layer.metadata,
    })
}
