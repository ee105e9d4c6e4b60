//! Error types for the judgment-analyzer library.
//!
//! The taxonomy mirrors the three ways an analysis can go wrong:
//!
//! * [`ExtractionFailure`]: the document could not be turned into pages
//!   (not a PDF, corrupt, OCR engine failure). Aborts the whole ingestion;
//!   no partial [`crate::model::ExtractionResult`] is ever produced.
//!
//! * [`StepFailure`]: one analysis step could not produce a usable result
//!   after retries. Aborts the remaining steps. The already completed step
//!   results travel alongside it in [`PipelineFailure`].
//!
//! * [`ValidationWarning`]: a step's output is missing declared fields.
//!   Not an error at all: it is logged and attached to the step result.
//!
//! [`AnalysisError`] is what the top-level entry points return.

use crate::model::AnalysisStepResult;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the judgment-analyzer entry points.
#[derive(Debug, Error)]
pub enum AnalysisError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Judgment file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Extraction phase failed.
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionFailure),

    /// An analysis step failed; completed steps are kept in the payload.
    #[error(transparent)]
    Pipeline(#[from] PipelineFailure),

    // ── Provider / config errors ──────────────────────────────────────────
    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The status sink rejected a write.
    #[error("Status sink error: {0}")]
    Status(String),

    /// The caller cancelled the run between phases.
    #[error("analysis cancelled")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Extraction could not produce a complete set of pages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// The bytes do not start with the `%PDF` magic.
    #[error("input is not a PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// PDF header/trailer/xref or text layer is corrupt.
    #[error("PDF is corrupt or unreadable: {detail}")]
    CorruptPdf { detail: String },

    /// The document parsed but has zero pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Could not bind to a pdfium library for rasterisation.
    #[error("Failed to bind to pdfium library: {0}\nSet PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.")]
    PdfiumBindingFailed(String),

    /// pdfium could not render a page for OCR.
    #[error("rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The OCR engine failed on one page; the whole extraction is aborted.
    #[error("OCR failed on page {page}: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// The OCR engine could not be started.
    #[error("OCR engine unavailable: {0}")]
    OcrEngineUnavailable(String),

    /// Temporary raster storage could not be created or written.
    #[error("temporary raster storage error: {0}")]
    TempStorage(String),

    /// Cancellation was requested at a page boundary.
    #[error("extraction cancelled")]
    Cancelled,

    /// Unexpected internal error (task panic, join failure).
    #[error("internal extraction error: {0}")]
    Internal(String),
}

/// A single analysis step could not produce a result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepFailure {
    /// The backend kept failing transiently until the retry budget ran out.
    #[error("step '{step}' failed after {attempts} attempts: {detail}")]
    Generation {
        step: String,
        attempts: u32,
        detail: String,
    },

    /// The backend answered, but never with a parseable JSON object.
    #[error("step '{step}' returned invalid structured output after {attempts} attempts: {detail}")]
    InvalidOutput {
        step: String,
        attempts: u32,
        detail: String,
    },

    /// The backend rejected the request permanently (auth, bad request).
    #[error("step '{step}' was rejected by the generation backend: {detail}")]
    Rejected { step: String, detail: String },

    /// Cancellation was requested before or during the step.
    #[error("step '{step}' cancelled")]
    Cancelled { step: String },
}

impl StepFailure {
    /// Name of the step that failed.
    pub fn step(&self) -> &str {
        match self {
            StepFailure::Generation { step, .. }
            | StepFailure::InvalidOutput { step, .. }
            | StepFailure::Rejected { step, .. }
            | StepFailure::Cancelled { step } => step,
        }
    }
}

/// A failed run: the failing step plus every step that completed before it.
#[derive(Debug, Clone, Error)]
#[error("analysis step '{}' failed: {failure}", failure.step())]
pub struct PipelineFailure {
    pub failure: StepFailure,
    pub completed: Vec<AnalysisStepResult>,
    /// Everything spent, the failing step's attempts included.
    pub tokens_used: u64,
}

/// Error returned by a [`crate::pipeline::backend::GenerationBackend`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// Worth retrying: timeouts, 429/5xx, dropped connections.
    #[error("transient generation error: {0}")]
    Transient(String),

    /// Not worth retrying: authentication, malformed request.
    #[error("generation rejected: {0}")]
    Rejected(String),
}

static AUTH_REJECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:https?|status(?:[ _]code)?|code)\b\W{0,3}(?:401|403)\b|\b(?:401|403)\s+(?:unauthorized|forbidden)\b|\bunauthori[sz]ed\b|\bforbidden\b|\binvalid[ _]api[ _]key\b",
    )
    .unwrap()
});

impl GenerationError {
    /// Classify a provider error message.
    ///
    /// Only an auth status code in HTTP position (`HTTP 401`, `status: 403`,
    /// `401 Unauthorized`) or an explicit auth phrase counts as a rejection.
    /// Bare digits elsewhere, such as in a request id, do not.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if AUTH_REJECTION.is_match(&message) {
            GenerationError::Rejected(message)
        } else {
            GenerationError::Transient(message)
        }
    }
}

/// A step's parsed output is missing fields the step declares as required.
///
/// Non-fatal: the step result is kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationWarning {
    pub step: String,
    pub missing_fields: Vec<String>,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step '{}' output is missing required fields: {}",
            self.step,
            self.missing_fields.join(", ")
        )
    }
}
