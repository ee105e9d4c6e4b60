//! Job status records and where they are written.
//!
//! The pipeline only ever creates or replaces a whole [`StatusRecord`]; it
//! never patches one. A record written after a failure therefore carries
//! the completed step results in `result` alongside the `error` text.

use crate::error::AnalysisError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: JobStatus,
    /// `extraction`, `chunking` or `analysis` while processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn queued() -> Self {
        Self::new(JobStatus::Queued, None, None, None)
    }

    pub fn processing(phase: impl Into<String>) -> Self {
        Self::new(JobStatus::Processing, Some(phase.into()), None, None)
    }

    pub fn completed(result: Value) -> Self {
        Self::new(JobStatus::Completed, None, Some(result), None)
    }

    /// `partial` holds whatever finished before the failure, if anything.
    pub fn failed(error: impl Into<String>, partial: Option<Value>) -> Self {
        Self::new(JobStatus::Failed, None, partial, Some(error.into()))
    }

    fn new(status: JobStatus, phase: Option<String>, result: Option<Value>, error: Option<String>) -> Self {
        Self {
            status,
            phase,
            result,
            error,
            updated_at: Utc::now(),
        }
    }
}

/// Persists status records, keyed by job id.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Create or replace the record for `job_id`.
    async fn put(&self, job_id: &str, record: StatusRecord) -> Result<(), AnalysisError>;
}

/// Process-local status store.
///
/// Keeps the latest record per job plus the bare status of every earlier
/// one, so the transition sequence can be inspected without holding on to
/// replaced result payloads.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    jobs: RwLock<HashMap<String, JobEntry>>,
}

#[derive(Debug)]
struct JobEntry {
    latest: StatusRecord,
    history: Vec<JobStatus>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest record for `job_id`.
    pub async fn get(&self, job_id: &str) -> Option<StatusRecord> {
        self.jobs.read().await.get(job_id).map(|entry| entry.latest.clone())
    }

    /// Every status written for `job_id`, oldest first.
    pub async fn history(&self, job_id: &str) -> Vec<JobStatus> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|entry| entry.history.clone())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl StatusSink for InMemoryStatusStore {
    async fn put(&self, job_id: &str, record: StatusRecord) -> Result<(), AnalysisError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(job_id) {
            Some(entry) => {
                entry.history.push(record.status);
                entry.latest = record;
            }
            None => {
                jobs.insert(
                    job_id.to_string(),
                    JobEntry {
                        history: vec![record.status],
                        latest: record,
                    },
                );
            }
        }
        Ok(())
    }
}
