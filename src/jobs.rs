//! Background analysis jobs reported through a [`StatusSink`].
//!
//! [`JobRunner::submit`] records the job as queued, spawns the run on the
//! tokio runtime and returns a [`JobHandle`] straight away. The queued
//! record exists before the id is handed out, so polling can start at once.
//! The task writes one record per later transition:
//!
//! ```text
//! queued ─▶ processing(extraction) ─▶ processing(chunking) ─▶ processing(analysis) ─▶ completed
//!                  │                                                   │
//!                  └──────────────────────▶ failed ◀───────────────────┘
//! ```
//!
//! A failed record's `error` names the phase (`extraction failed: …`) or the
//! step (`analysis step 'ratio' failed: …`). When a step fails, `result`
//! keeps the extraction, the chunks and every completed step.

use crate::analyze::Analyzer;
use crate::error::AnalysisError;
use crate::model::{AnalysisStepResult, ChunkingResult, ExtractionResult, JudgmentAnalysis};
use crate::status::{StatusRecord, StatusSink};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Runs analyses in the background.
#[derive(Clone)]
pub struct JobRunner {
    analyzer: Arc<Analyzer>,
    sink: Arc<dyn StatusSink>,
}

/// A submitted job.
pub struct JobHandle {
    pub job_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<Result<JudgmentAnalysis, AnalysisError>>,
}

impl JobHandle {
    /// Request cancellation. The job stops at its next checkpoint and is
    /// recorded as failed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the job to finish.
    pub async fn join(self) -> Result<JudgmentAnalysis, AnalysisError> {
        self.handle
            .await
            .map_err(|e| AnalysisError::Internal(format!("job task failed: {e}")))?
    }
}

impl JobRunner {
    pub fn new(analyzer: Arc<Analyzer>, sink: Arc<dyn StatusSink>) -> Self {
        Self { analyzer, sink }
    }

    /// Start analysing `bytes` in the background.
    ///
    /// Must be called from within a tokio runtime. Fails only if the queued
    /// record cannot be written, in which case nothing is spawned.
    pub async fn submit(&self, judgment_id: impl Into<String>, bytes: Vec<u8>) -> Result<JobHandle, AnalysisError> {
        let job_id = Uuid::new_v4().to_string();
        let judgment_id = judgment_id.into();
        let cancel = CancellationToken::new();
        info!("Submitting job {} for judgment '{}'", job_id, judgment_id);
        self.sink.put(&job_id, StatusRecord::queued()).await?;

        let job = Job {
            analyzer: Arc::clone(&self.analyzer),
            sink: Arc::clone(&self.sink),
            job_id: job_id.clone(),
            judgment_id,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(async move { job.run(bytes).await });

        Ok(JobHandle { job_id, cancel, handle })
    }
}

struct Job {
    analyzer: Arc<Analyzer>,
    sink: Arc<dyn StatusSink>,
    job_id: String,
    judgment_id: String,
    cancel: CancellationToken,
}

impl Job {
    async fn run(self, bytes: Vec<u8>) -> Result<JudgmentAnalysis, AnalysisError> {
        // ── Extraction ───────────────────────────────────────────────────
        self.put(StatusRecord::processing("extraction")).await?;
        let extraction = match self.analyzer.extract(&bytes, &self.cancel).await {
            Ok(extraction) => extraction,
            Err(e) => return self.fail(e.to_string(), e, None).await,
        };
        drop(bytes);

        // ── Chunking ─────────────────────────────────────────────────────
        self.put(StatusRecord::processing("chunking")).await?;
        if self.cancel.is_cancelled() {
            return self.fail("chunking cancelled".into(), AnalysisError::Cancelled, None).await;
        }
        let chunking = self.analyzer.chunk(&self.judgment_id, &extraction);

        // ── Analysis ─────────────────────────────────────────────────────
        self.put(StatusRecord::processing("analysis")).await?;
        let analysis = match self.analyzer.analyze_chunks(&chunking.chunks, &self.cancel).await {
            Ok(analysis) => analysis,
            Err(e) => {
                let partial = match &e {
                    AnalysisError::Pipeline(p) => Some(partial_result(&extraction, &chunking, &p.completed)?),
                    _ => None,
                };
                return self.fail(e.to_string(), e, partial).await;
            }
        };

        let outcome = JudgmentAnalysis {
            judgment_id: self.judgment_id.clone(),
            extraction,
            chunking,
            analysis,
        };
        let value = to_value(&outcome)?;
        self.put(StatusRecord::completed(value)).await?;
        info!("Job {} completed", self.job_id);
        Ok(outcome)
    }

    async fn put(&self, record: StatusRecord) -> Result<(), AnalysisError> {
        self.sink.put(&self.job_id, record).await
    }

    async fn fail(
        &self,
        message: String,
        error: AnalysisError,
        partial: Option<Value>,
    ) -> Result<JudgmentAnalysis, AnalysisError> {
        warn!("Job {} failed: {}", self.job_id, message);
        self.put(StatusRecord::failed(message, partial)).await?;
        Err(error)
    }
}

/// Extraction, chunks and completed steps of a run that failed mid-analysis.
fn partial_result(
    extraction: &ExtractionResult,
    chunking: &ChunkingResult,
    completed: &[AnalysisStepResult],
) -> Result<Value, AnalysisError> {
    let mut steps = Map::new();
    for step in completed {
        steps.insert(step.step.clone(), to_value(step)?);
    }
    Ok(json!({
        "extraction": to_value(extraction)?,
        "chunking": to_value(chunking)?,
        "completed_steps": steps,
    }))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, AnalysisError> {
    serde_json::to_value(value).map_err(|e| AnalysisError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::error::{ExtractionFailure, GenerationError};
    use crate::model::TokenUsage;
    use crate::pipeline::backend::{GenerationBackend, GenerationRequest, GenerationResponse};
    use crate::pipeline::extract::{Extractor, TextLayer, TextLayerContent};
    use crate::pipeline::offline::OfflineBackend;
    use crate::status::{InMemoryStatusStore, JobStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const JUDGMENT: &str = "Asha Rao v. State of Goa\n\n\
        1. The appellant was convicted on 12 March 2018.\n\n\
        2. We hold that the conviction cannot be sustained. The appeal is allowed.";

    struct FixedTextLayer;

    impl TextLayer for FixedTextLayer {
        fn read(&self, _pdf: &[u8]) -> Result<TextLayerContent, ExtractionFailure> {
            Ok(TextLayerContent {
                page_count: 1,
                text: JUDGMENT.to_string(),
                metadata: None,
            })
        }
    }

    /// Answers the first `good` steps with JSON, then prose forever.
    struct Degrading {
        good: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationBackend for Degrading {
        fn identifier(&self) -> String {
            "degrading".into()
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let text = if n < self.good {
                r#"{"ok": true}"#.to_string()
            } else {
                "I could not find anything structured here.".to_string()
            };
            Ok(GenerationResponse {
                text,
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                },
            })
        }
    }

    fn runner(backend: Arc<dyn GenerationBackend>) -> (JobRunner, Arc<InMemoryStatusStore>) {
        let config = AnalysisConfig::builder()
            .max_attempts(3)
            .retry_backoff_ms(0)
            .build()
            .unwrap();
        let extractor = Extractor::new(config.extraction).with_text_layer(Arc::new(FixedTextLayer));
        let analyzer = Analyzer::new(config, backend).with_extractor(extractor);
        let store = Arc::new(InMemoryStatusStore::new());
        let sink: Arc<dyn StatusSink> = store.clone();
        (JobRunner::new(Arc::new(analyzer), sink), store)
    }

    #[tokio::test]
    async fn offline_job_completes() {
        let (runner, store) = runner(Arc::new(OfflineBackend::new()));
        let handle = runner.submit("CRA-9", b"%PDF-1.7".to_vec()).await.unwrap();
        let job_id = handle.job_id.clone();
        let analysis = handle.join().await.unwrap();

        assert_eq!(analysis.analysis.steps.len(), 10);
        assert_eq!(
            store.history(&job_id).await,
            vec![
                JobStatus::Queued,
                JobStatus::Processing,
                JobStatus::Processing,
                JobStatus::Processing,
                JobStatus::Completed
            ]
        );
        let record = store.get(&job_id).await.unwrap();
        let result = record.result.unwrap();
        assert_eq!(result["judgment_id"], "CRA-9");
        assert!(result["analysis"]["steps"]["summary"].is_object());
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn step_failure_keeps_completed_steps() {
        let backend = Arc::new(Degrading {
            good: 2,
            calls: AtomicUsize::new(0),
        });
        let (runner, store) = runner(backend.clone());
        let handle = runner.submit("CRA-10", b"%PDF-1.7".to_vec()).await.unwrap();
        let job_id = handle.job_id.clone();
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, AnalysisError::Pipeline(_)));

        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        let message = record.error.unwrap();
        assert!(message.contains("analysis step 'timeline' failed"), "got: {message}");

        let partial = record.result.unwrap();
        let steps = partial["completed_steps"].as_object().unwrap();
        assert_eq!(steps.keys().collect::<Vec<_>>(), vec!["metadata", "facts"]);
        assert!(partial["chunking"]["total_chunks"].as_u64().unwrap() > 0);
        // two good calls plus three failed attempts at timeline
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn job_is_queued_before_submit_returns() {
        let (runner, store) = runner(Arc::new(OfflineBackend::new()));
        let handle = runner.submit("CRA-11", b"%PDF-1.7".to_vec()).await.unwrap();

        let first = store.get(&handle.job_id).await.unwrap();
        assert_eq!(first.status, JobStatus::Queued);
        assert!(first.result.is_none());

        let job_id = handle.job_id.clone();
        handle.join().await.unwrap();
        assert_eq!(store.get(&job_id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn extraction_failure_names_phase() {
        let (runner, store) = runner(Arc::new(OfflineBackend::new()));
        let handle = runner.submit("bad", b"GIF89a".to_vec()).await.unwrap();
        let job_id = handle.job_id.clone();
        assert!(handle.join().await.is_err());

        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().starts_with("extraction failed:"));
        assert!(record.result.is_none());
        assert_eq!(store.history(&job_id).await.len(), 3);
    }
}
