//! # judgment-analyzer
//!
//! Anchored structured analysis of legal judgments.
//!
//! A judgment PDF (digital or scanned) goes in; a structured analysis comes
//! out in which every derived claim (a fact, an issue, a holding, a cited
//! precedent) points back to the page and paragraph it came from.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Extract  text layer (lopdf + pdf-extract), or pdfium render + OCR
//!  ├─ 2. Chunk    paragraphs → size-bounded, overlapping, anchored chunks
//!  ├─ 3. Steps    metadata → facts → timeline → issues → arguments →
//!  │              ratio → obiter → statutes → precedents → summary
//!  │              (each step sees the parsed output of all earlier ones)
//!  └─ 4. Result   per-step JSON + anchors + token totals
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use judgment_analyzer::{analyze_file, AnalysisConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = AnalysisConfig::default();
//!     let result = analyze_file("judgment.pdf", &config).await?;
//!     println!("{}", result.analysis.summary);
//!     eprintln!("tokens: {}", result.analysis.total_tokens_used);
//!     Ok(())
//! }
//! ```
//!
//! Without an API key, [`Analyzer::offline`] answers every step with a
//! deterministic heuristic generator, so the pipeline can be exercised end
//! to end.
//!
//! ## Background Jobs
//!
//! [`JobRunner`] runs an analysis on the tokio runtime and records
//! `queued → processing → completed | failed` in a [`StatusSink`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `judgment-analyze` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! judgment-analyzer = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod jobs;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod status;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{
    analyze_bytes, analyze_file, analyze_sync, analyze_to_file, extract_only, inspect, Analyzer, InspectReport,
};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, ChunkingConfig, ExtractionConfig};
pub use error::{
    AnalysisError, ExtractionFailure, GenerationError, PipelineFailure, StepFailure, ValidationWarning,
};
pub use jobs::{JobHandle, JobRunner};
pub use model::{
    AnalysisStepResult, ChunkAnchor, ChunkingResult, CompleteAnalysisResult, DocumentMetadata, ExtractionMethod,
    ExtractionResult, JudgmentAnalysis, JudgmentChunk, PageContent, StepAnchor, TokenUsage,
};
pub use pipeline::backend::{GenerationBackend, GenerationRequest, GenerationResponse, LlmBackend, ResponseFormat};
pub use pipeline::offline::OfflineBackend;
pub use pipeline::orchestrator::{PipelineState, StepOrchestrator};
pub use pipeline::retry::RetryPolicy;
pub use pipeline::steps::{default_steps, LegalStep, StepDescriptor};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use status::{InMemoryStatusStore, JobStatus, StatusRecord, StatusSink};
