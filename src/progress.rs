//! Progress-callback trait for extraction and per-step analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through extraction, chunking and each
//! analysis step. Callers can forward them to a progress bar, a log, or a
//! job-status record without the library knowing how.
//!
//! # Example
//!
//! ```rust
//! use judgment_analyzer::{AnalysisConfig, AnalysisProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StepCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl AnalysisProgressCallback for StepCounter {
//!     fn on_step_complete(&self, step: &str, index: usize, total: usize, tokens: u64) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("[{}/{}] {} ({} tokens)", index + 1, total, step, tokens);
//!     }
//! }
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(Arc::new(StepCounter { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::model::ExtractionMethod;
use crate::pipeline::orchestrator::PipelineState;
use std::sync::Arc;

/// Called by the pipeline as it progresses.
///
/// All methods have no-op defaults. Steps run strictly sequentially, so step
/// events never overlap, but the callback may be invoked from a background
/// task and therefore must be `Send + Sync`.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before the document bytes are parsed.
    fn on_extraction_start(&self) {}

    /// Called once all pages have text.
    fn on_extraction_complete(&self, total_pages: usize, method: ExtractionMethod) {
        let _ = (total_pages, method);
    }

    /// Called once the chunker has produced its result.
    fn on_chunking_complete(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called on every pipeline state transition.
    fn on_state_change(&self, state: &PipelineState) {
        let _ = state;
    }

    /// Called before the first attempt of a step.
    ///
    /// `index` is 0-based, `total` is the number of steps in the sequence.
    fn on_step_start(&self, step: &str, index: usize, total: usize) {
        let _ = (step, index, total);
    }

    /// Called before each retry of a step (`attempt` is 1-indexed, ≥ 2).
    fn on_step_retry(&self, step: &str, attempt: u32) {
        let _ = (step, attempt);
    }

    /// Called when a step's output has been parsed and its anchors collected.
    fn on_step_complete(&self, step: &str, index: usize, total: usize, tokens_used: u64) {
        let _ = (step, index, total, tokens_used);
    }

    /// Called when a step fails; no further steps will run.
    fn on_step_error(&self, step: &str, index: usize, total: usize, error: &str) {
        let _ = (step, index, total, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
