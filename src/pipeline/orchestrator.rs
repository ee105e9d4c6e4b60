//! Sequential, context-chaining execution of the analysis steps.
//!
//! ## Per step
//!
//! 1. Select a positional window of chunks ([`select_chunks`]).
//! 2. Build the request: step header, shared preamble, step instructions,
//!    the excerpts, and the JSON context of every step completed so far.
//! 3. Call the backend through [`with_retry`]. Transient backend errors and
//!    unparseable output are retried with backoff; a rejected request is not.
//! 4. Validate required fields (a warning, never a failure).
//! 5. Collect anchors from the parsed output.
//!
//! Step N+1 starts only after step N has been parsed and anchored, because
//! its prompt contains step N's output. The first failing step ends the run;
//! the results of the steps before it are returned in [`PipelineFailure`].
//!
//! ## States
//!
//! ```text
//! NotStarted → Running(step_i) → Running(step_i+1) … → Completed
//!                      └──────→ Failed(step_i)
//! ```

use crate::config::AnalysisConfig;
use crate::error::{GenerationError, PipelineFailure, StepFailure};
use crate::model::{AnalysisStepResult, CompleteAnalysisResult, JudgmentChunk};
use crate::pipeline::anchors::extract_anchors;
use crate::pipeline::backend::{GenerationBackend, GenerationRequest, ResponseFormat};
use crate::pipeline::json::{parse_structured, validate_required, OutputParseError};
use crate::pipeline::retry::{with_retry, RetryError, RetryPolicy, Retryable};
use crate::pipeline::steps::{select_chunks, StepDescriptor};
use crate::progress::ProgressCallback;
use crate::prompts::{step_header, ANALYST_PREAMBLE, CONTEXT_HEADING, EXCERPTS_HEADING};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    NotStarted,
    Running { step: String, index: usize },
    Failed { step: String, error: String },
    Completed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed { .. })
    }
}

/// Runs an ordered list of steps against one generation backend.
pub struct StepOrchestrator {
    backend: Arc<dyn GenerationBackend>,
    retry: RetryPolicy,
    max_chunks_per_step: usize,
    temperature: f32,
    max_tokens: usize,
    progress: Option<ProgressCallback>,
    state: PipelineState,
}

impl StepOrchestrator {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self::from_config(backend, &AnalysisConfig::default())
    }

    pub fn from_config(backend: Arc<dyn GenerationBackend>, config: &AnalysisConfig) -> Self {
        Self {
            backend,
            retry: config.retry,
            max_chunks_per_step: config.max_chunks_per_step,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            progress: config.progress_callback.clone(),
            state: PipelineState::NotStarted,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    fn set_state(&mut self, state: PipelineState) {
        debug!("Pipeline state → {:?}", state);
        if let Some(ref cb) = self.progress {
            cb.on_state_change(&state);
        }
        self.state = state;
    }

    /// Run every step in order over `chunks`.
    pub async fn run(
        &mut self,
        chunks: &[JudgmentChunk],
        steps: &[StepDescriptor],
        cancel: &CancellationToken,
    ) -> Result<CompleteAnalysisResult, PipelineFailure> {
        self.set_state(PipelineState::NotStarted);
        let total = steps.len();
        let mut completed: Vec<AnalysisStepResult> = Vec::with_capacity(total);
        let mut context: Map<String, Value> = Map::new();
        let mut total_tokens = 0u64;

        info!(
            "Running {} analysis steps over {} chunks with backend {}",
            total,
            chunks.len(),
            self.backend.identifier()
        );

        for (index, step) in steps.iter().enumerate() {
            self.set_state(PipelineState::Running {
                step: step.name.clone(),
                index,
            });
            if let Some(ref cb) = self.progress {
                cb.on_step_start(&step.name, index, total);
            }

            let spent = AtomicU64::new(0);
            let outcome = if cancel.is_cancelled() {
                Err(StepFailure::Cancelled {
                    step: step.name.clone(),
                })
            } else {
                self.run_step(step, chunks, &context, cancel, &spent).await
            };

            match outcome {
                Ok(result) => {
                    total_tokens += result.tokens_used;
                    info!(
                        "Step '{}' complete: {} anchors, {} tokens, {} attempt(s)",
                        step.name,
                        result.anchors.len(),
                        result.tokens_used,
                        result.attempts
                    );
                    if let Some(ref cb) = self.progress {
                        cb.on_step_complete(&step.name, index, total, result.tokens_used);
                    }
                    context.insert(step.name.clone(), result.parsed_result.clone());
                    completed.push(result);
                }
                Err(failure) => {
                    total_tokens += spent.load(Ordering::Relaxed);
                    warn!("{}", failure);
                    if let Some(ref cb) = self.progress {
                        cb.on_step_error(&step.name, index, total, &failure.to_string());
                    }
                    self.set_state(PipelineState::Failed {
                        step: step.name.clone(),
                        error: failure.to_string(),
                    });
                    return Err(PipelineFailure {
                        failure,
                        completed,
                        tokens_used: total_tokens,
                    });
                }
            }
        }

        self.set_state(PipelineState::Completed);
        info!("Analysis complete: {} steps, {} tokens", completed.len(), total_tokens);

        Ok(CompleteAnalysisResult {
            summary: context.get("summary").cloned().unwrap_or(Value::Null),
            steps: completed,
            total_tokens_used: total_tokens,
            completed_at: Utc::now(),
        })
    }

    async fn run_step(
        &self,
        step: &StepDescriptor,
        chunks: &[JudgmentChunk],
        context: &Map<String, Value>,
        cancel: &CancellationToken,
        spent: &AtomicU64,
    ) -> Result<AnalysisStepResult, StepFailure> {
        let selected = select_chunks(chunks, step.window, self.max_chunks_per_step);
        debug!(
            "Step '{}': {} of {} chunks ({:?} window), context from {} step(s)",
            step.name,
            selected.len(),
            chunks.len(),
            step.window,
            context.len()
        );

        let request = build_step_request(step, selected, context, self.temperature, self.max_tokens);
        let backend = &self.backend;
        let progress = self.progress.as_ref();
        let label = format!("step '{}'", step.name);

        let outcome = with_retry(&self.retry, &label, cancel, |attempt| {
            if attempt > 1 {
                if let Some(cb) = progress {
                    cb.on_step_retry(&step.name, attempt);
                }
            }
            let request = &request;
            async move {
                let response = backend.generate(request).await.map_err(AttemptError::Backend)?;
                // Tokens count even when the reply is unusable.
                spent.fetch_add(response.usage.total(), Ordering::Relaxed);
                parse_structured(&response.text).map_err(AttemptError::Output)
            }
        })
        .await;

        let (parsed, attempts) = outcome.map_err(|e| step_failure(&step.name, e))?;

        let validation_warning = validate_required(&step.name, &parsed, &step.required_fields);
        if let Some(ref w) = validation_warning {
            warn!("{}", w);
        }
        let anchors = extract_anchors(&parsed);

        Ok(AnalysisStepResult {
            step: step.name.clone(),
            parsed_result: parsed,
            anchors,
            backend: self.backend.identifier(),
            tokens_used: spent.load(Ordering::Relaxed),
            timestamp: Utc::now(),
            attempts,
            validation_warning,
        })
    }
}

/// What went wrong with a single attempt.
#[derive(Debug)]
enum AttemptError {
    Backend(GenerationError),
    Output(OutputParseError),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Backend(e) => write!(f, "{e}"),
            AttemptError::Output(e) => write!(f, "{e}"),
        }
    }
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Backend(GenerationError::Transient(_)) => true,
            AttemptError::Backend(GenerationError::Rejected(_)) => false,
            AttemptError::Output(_) => true,
        }
    }
}

fn step_failure(step: &str, err: RetryError<AttemptError>) -> StepFailure {
    let step = step.to_string();
    match err {
        RetryError::Exhausted {
            attempts,
            last: AttemptError::Output(e),
        } => StepFailure::InvalidOutput {
            step,
            attempts,
            detail: e.to_string(),
        },
        RetryError::Exhausted {
            attempts,
            last: AttemptError::Backend(e),
        } => StepFailure::Generation {
            step,
            attempts,
            detail: e.to_string(),
        },
        RetryError::Aborted {
            error: AttemptError::Backend(GenerationError::Rejected(detail)),
            ..
        } => StepFailure::Rejected { step, detail },
        RetryError::Aborted { attempts, error } => StepFailure::Generation {
            step,
            attempts,
            detail: error.to_string(),
        },
        RetryError::Cancelled { .. } => StepFailure::Cancelled { step },
    }
}

/// Assemble the request for one step.
///
/// `context` holds the parsed results of the steps completed so far, keyed
/// by step name in execution order.
pub fn build_step_request(
    step: &StepDescriptor,
    chunks: &[JudgmentChunk],
    context: &Map<String, Value>,
    temperature: f32,
    max_tokens: usize,
) -> GenerationRequest {
    let mut system = format!(
        "{}\n\n{}\n\n{}",
        step_header(&step.name),
        ANALYST_PREAMBLE,
        step.instructions
    );
    if !step.required_fields.is_empty() {
        system.push_str("\n\nRequired top-level fields: ");
        system.push_str(&step.required_fields.join(", "));
    }

    let mut user = String::from(EXCERPTS_HEADING);
    user.push_str("\n\n");
    for chunk in chunks {
        user.push_str(&format!(
            "[chunk {} | page {} | paragraph {}]\n{}\n\n",
            chunk.chunk_id, chunk.anchor.page_number, chunk.anchor.paragraph_number, chunk.text
        ));
    }
    user.push_str(CONTEXT_HEADING);
    user.push('\n');
    user.push_str(&Value::Object(context.clone()).to_string());

    GenerationRequest {
        system_instructions: system,
        user_content: user,
        response_format: ResponseFormat::Json,
        temperature,
        max_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkAnchor, ChunkMetadata, TokenUsage};
    use crate::pipeline::backend::GenerationResponse;
    use crate::pipeline::steps::{default_steps, ChunkWindow};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    type Script = Box<dyn Fn(usize, &GenerationRequest) -> Result<String, GenerationError> + Send + Sync>;

    /// Backend driven by a closure over (call index, request).
    struct ScriptedBackend {
        calls: Mutex<Vec<GenerationRequest>>,
        script: Script,
    }

    impl ScriptedBackend {
        fn new(
            script: impl Fn(usize, &GenerationRequest) -> Result<String, GenerationError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                script: Box::new(script),
            })
        }

        fn requests(&self) -> Vec<GenerationRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn identifier(&self) -> String {
            "scripted".into()
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(request.clone());
                calls.len() - 1
            };
            let text = (self.script)(index, request)?;
            Ok(GenerationResponse {
                text,
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                },
            })
        }
    }

    fn chunks(n: usize) -> Vec<JudgmentChunk> {
        (0..n)
            .map(|i| JudgmentChunk {
                chunk_id: format!("J_p1_para{}_c{i}", i + 1),
                text: format!("Paragraph text number {i}."),
                anchor: ChunkAnchor {
                    page_number: 1,
                    paragraph_number: i + 1,
                    start_char: 0,
                    end_char: 25,
                },
                metadata: ChunkMetadata {
                    word_count: 4,
                    char_count: 25,
                },
            })
            .collect()
    }

    fn steps(names: &[&str]) -> Vec<StepDescriptor> {
        names
            .iter()
            .map(|n| StepDescriptor::new(*n, ChunkWindow::Front, &[], format!("Do {n}.")))
            .collect()
    }

    fn orchestrator(backend: Arc<ScriptedBackend>, attempts: u32) -> StepOrchestrator {
        StepOrchestrator::new(backend).with_retry_policy(RetryPolicy::immediate(attempts))
    }

    #[tokio::test]
    async fn runs_steps_in_order_and_sums_tokens() {
        let backend = ScriptedBackend::new(|i, _| Ok(format!(r#"{{"marker": "m{i}"}}"#)));
        let mut orch = orchestrator(backend.clone(), 3);
        let result = orch
            .run(&chunks(3), &steps(&["a", "b", "c"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.step_names(), vec!["a", "b", "c"]);
        assert_eq!(result.total_tokens_used, 45);
        assert_eq!(result.step("b").unwrap().parsed_result, json!({"marker": "m1"}));
        assert_eq!(result.summary, Value::Null);
        assert_eq!(orch.state(), &PipelineState::Completed);
    }

    #[tokio::test]
    async fn step_k_context_contains_exactly_prior_steps() {
        let backend = ScriptedBackend::new(|i, _| Ok(format!(r#"{{"marker": "m{i}"}}"#)));
        let names = ["s0", "s1", "s2", "s3"];
        let mut orch = orchestrator(backend.clone(), 1);
        orch.run(&chunks(2), &steps(&names), &CancellationToken::new())
            .await
            .unwrap();

        let requests = backend.requests();
        assert_eq!(requests.len(), 4);
        for (k, req) in requests.iter().enumerate() {
            let context_json = req.user_content.split(CONTEXT_HEADING).nth(1).unwrap().trim();
            let context: Map<String, Value> = serde_json::from_str(context_json).unwrap();
            let keys: Vec<&str> = context.keys().map(|s| s.as_str()).collect();
            assert_eq!(keys, names[..k].to_vec(), "step {k}");
            for j in 0..k {
                assert_eq!(context[names[j]], json!({"marker": format!("m{j}")}));
            }
        }
    }

    #[tokio::test]
    async fn non_json_output_fails_after_exact_attempts() {
        let backend = ScriptedBackend::new(|_, _| Ok("I cannot produce JSON today.".into()));
        let mut orch = orchestrator(backend.clone(), 3);
        let err = orch
            .run(&chunks(2), &steps(&["metadata", "facts"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(backend.requests().len(), 3);
        assert!(matches!(
            err.failure,
            StepFailure::InvalidOutput { ref step, attempts: 3, .. } if step == "metadata"
        ));
        assert!(err.completed.is_empty());
        assert!(matches!(orch.state(), PipelineState::Failed { step, .. } if step == "metadata"));
    }

    #[tokio::test]
    async fn transient_error_then_success_records_attempts() {
        let backend = ScriptedBackend::new(|i, _| {
            if i == 0 {
                Err(GenerationError::Transient("503".into()))
            } else {
                Ok(r#"{"ok": true}"#.into())
            }
        });
        let mut orch = orchestrator(backend.clone(), 3);
        let result = orch
            .run(&chunks(1), &steps(&["only"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.steps[0].attempts, 2);
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn rejected_request_is_not_retried() {
        let backend = ScriptedBackend::new(|_, _| Err(GenerationError::Rejected("401".into())));
        let mut orch = orchestrator(backend.clone(), 5);
        let err = orch
            .run(&chunks(1), &steps(&["metadata"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(backend.requests().len(), 1);
        assert!(matches!(err.failure, StepFailure::Rejected { .. }));
    }

    #[tokio::test]
    async fn failure_keeps_completed_steps() {
        let backend = ScriptedBackend::new(|i, _| {
            if i < 2 {
                Ok(format!(r#"{{"n": {i}}}"#))
            } else {
                Err(GenerationError::Transient("timeout".into()))
            }
        });
        let mut orch = orchestrator(backend.clone(), 2);
        let err = orch
            .run(&chunks(4), &steps(&["a", "b", "c", "d"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.failure.step(), "c");
        assert!(matches!(err.failure, StepFailure::Generation { attempts: 2, .. }));
        let done: Vec<&str> = err.completed.iter().map(|r| r.step.as_str()).collect();
        assert_eq!(done, vec!["a", "b"]);
        assert_eq!(err.tokens_used, 30);
        // c failed twice; d never ran
        assert_eq!(backend.requests().len(), 4);
    }

    #[tokio::test]
    async fn missing_required_field_is_a_warning() {
        let backend = ScriptedBackend::new(|_, _| Ok(r#"{"case_name": "A v B"}"#.into()));
        let mut orch = orchestrator(backend, 1);
        let step = StepDescriptor::new("metadata", ChunkWindow::Front, &["case_name", "court"], "x");
        let result = orch
            .run(&chunks(1), &[step], &CancellationToken::new())
            .await
            .unwrap();
        let warning = result.steps[0].validation_warning.as_ref().unwrap();
        assert_eq!(warning.missing_fields, vec!["court"]);
        assert_eq!(orch.state(), &PipelineState::Completed);
    }

    #[tokio::test]
    async fn anchors_are_collected_per_step() {
        let backend = ScriptedBackend::new(|_, _| {
            Ok(r#"{"facts": [{"statement": "s1", "anchor": {"page": 1, "paragraph": 2}},
                             {"statement": "s2", "anchor": {"page": 1, "paragraph": 3}}]}"#
                .into())
        });
        let mut orch = orchestrator(backend, 1);
        let result = orch
            .run(&chunks(3), &steps(&["facts"]), &CancellationToken::new())
            .await
            .unwrap();
        let anchors = &result.steps[0].anchors;
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[1].path, "facts[1]");
        assert_eq!(anchors[1].anchor, json!({"page": 1, "paragraph": 3}));
    }

    #[tokio::test]
    async fn cancelled_before_start_fails_first_step() {
        let backend = ScriptedBackend::new(|_, _| Ok("{}".into()));
        let mut orch = orchestrator(backend.clone(), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch.run(&chunks(1), &steps(&["a", "b"]), &cancel).await.unwrap_err();
        assert_eq!(err.failure, StepFailure::Cancelled { step: "a".into() });
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn tokens_from_discarded_replies_are_counted() {
        // Even calls ramble, odd calls answer: every step takes two attempts.
        let backend = ScriptedBackend::new(|i, _| {
            if i % 2 == 0 {
                Ok("not json".into())
            } else {
                Ok(r#"{"ok": true}"#.into())
            }
        });
        let mut orch = orchestrator(backend.clone(), 3);
        let result = orch
            .run(&chunks(1), &steps(&["a", "b"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(backend.requests().len(), 4);
        assert_eq!(result.steps[0].tokens_used, 30);
        assert_eq!(result.steps[1].attempts, 2);
        assert_eq!(result.total_tokens_used, 60);
    }

    #[tokio::test]
    async fn failed_step_tokens_are_part_of_the_failure_total() {
        let backend = ScriptedBackend::new(|i, _| {
            if i == 0 {
                Ok(r#"{"ok": true}"#.into())
            } else {
                Ok("still thinking".into())
            }
        });
        let mut orch = orchestrator(backend.clone(), 3);
        let err = orch
            .run(&chunks(1), &steps(&["a", "b"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.failure.step(), "b");
        assert_eq!(backend.requests().len(), 4);
        assert_eq!(err.tokens_used, 60);
    }

    #[test]
    fn request_lists_chunks_with_anchors() {
        let step = default_steps().remove(0);
        let req = build_step_request(&step, &chunks(2), &Map::new(), 0.1, 512);
        assert!(req.system_instructions.starts_with("ANALYSIS STEP: metadata"));
        assert!(req.system_instructions.contains("case_name, court, date"));
        assert!(req.user_content.contains("[chunk J_p1_para2_c1 | page 1 | paragraph 2]"));
        assert!(req.user_content.trim_end().ends_with("{}"));
        assert_eq!(req.response_format, ResponseFormat::Json);
        assert_eq!(req.max_tokens, 512);
    }
}
