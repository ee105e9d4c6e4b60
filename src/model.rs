//! Data model shared by every pipeline stage.
//!
//! All of these are plain serialisable values: they are produced once by the
//! stage that owns them and never mutated afterwards. `ExtractionResult`,
//! `ChunkingResult` and `CompleteAnalysisResult` are the three objects handed
//! to the status sink.

use crate::error::ValidationWarning;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Extraction ───────────────────────────────────────────────────────────

/// How text was obtained, per page or for the whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Embedded text layer.
    Digital,
    /// Rasterised page read by an OCR engine.
    Ocr,
    /// Document whose pages were obtained by different methods.
    Hybrid,
}

impl ExtractionMethod {
    /// Collapse the per-page methods into a document-level method.
    ///
    /// Returns `None` for an empty page list.
    pub fn summarize(pages: &[PageContent]) -> Option<Self> {
        let first = pages.first()?.extraction_method;
        if pages.iter().all(|p| p.extraction_method == first) {
            Some(first)
        } else {
            Some(ExtractionMethod::Hybrid)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Digital => "digital",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::Hybrid => "hybrid",
        }
    }
}

/// Text of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    /// 1-indexed page number.
    pub page_number: usize,
    pub text: String,
    pub extraction_method: ExtractionMethod,
}

/// Document information dictionary entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
}

impl DocumentMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.author.is_none() && self.subject.is_none() && self.keywords.is_none()
    }
}

/// Output of the extractor: every page of the document, or nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub pages: Vec<PageContent>,
    pub total_pages: usize,
    pub extraction_method: ExtractionMethod,
    pub metadata: Option<DocumentMetadata>,
}

impl ExtractionResult {
    /// Total characters across all pages.
    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }
}

// ── Chunking ─────────────────────────────────────────────────────────────

/// Exact location of a chunk inside its paragraph.
///
/// `start_char`/`end_char` are character offsets (not bytes) into the
/// trimmed paragraph text, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkAnchor {
    pub page_number: usize,
    pub paragraph_number: usize,
    pub start_char: usize,
    pub end_char: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub word_count: usize,
    pub char_count: usize,
}

/// An anchored slice of judgment text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgmentChunk {
    pub chunk_id: String,
    pub text: String,
    pub anchor: ChunkAnchor,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkingStatistics {
    pub total_pages: usize,
    pub total_paragraphs: usize,
    /// Mean chunk length in characters, rounded to the nearest integer.
    pub average_chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingResult {
    pub chunks: Vec<JudgmentChunk>,
    pub total_chunks: usize,
    pub statistics: ChunkingStatistics,
}

// ── Analysis ─────────────────────────────────────────────────────────────

/// A source anchor found inside a step's parsed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAnchor {
    /// Location inside the parsed result, e.g. `facts[2]` or `issues[0].sub_issues[1]`.
    pub path: String,
    /// The anchor value exactly as the backend produced it.
    pub anchor: Value,
}

/// Generation units consumed by one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// The outcome of one completed analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStepResult {
    pub step: String,
    pub parsed_result: Value,
    pub anchors: Vec<StepAnchor>,
    pub backend: String,
    /// Tokens spent across every attempt, including discarded replies.
    pub tokens_used: u64,
    pub timestamp: DateTime<Utc>,
    /// Number of generation attempts the step needed.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_warning: Option<ValidationWarning>,
}

/// Every step result of a successful run, in execution order.
///
/// `steps` serialises as a JSON object keyed by step name, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteAnalysisResult {
    #[serde(with = "steps_by_name")]
    pub steps: Vec<AnalysisStepResult>,
    /// Parsed result of the `summary` step, or `null` if the sequence had none.
    pub summary: Value,
    pub total_tokens_used: u64,
    pub completed_at: DateTime<Utc>,
}

impl CompleteAnalysisResult {
    /// Look up a step result by step name.
    pub fn step(&self, name: &str) -> Option<&AnalysisStepResult> {
        self.steps.iter().find(|s| s.step == name)
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step.as_str()).collect()
    }
}

/// Everything one analysis run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentAnalysis {
    pub judgment_id: String,
    pub extraction: ExtractionResult,
    pub chunking: ChunkingResult,
    pub analysis: CompleteAnalysisResult,
}

/// `Vec<AnalysisStepResult>` ⇄ `{ "<step>": AnalysisStepResult, … }`.
mod steps_by_name {
    use super::AnalysisStepResult;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(steps: &[AnalysisStepResult], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(steps.len()))?;
        for step in steps {
            map.serialize_entry(&step.step, step)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<AnalysisStepResult>, D::Error> {
        struct StepsVisitor;

        impl<'de> Visitor<'de> for StepsVisitor {
            type Value = Vec<AnalysisStepResult>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of step name to step result")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut steps = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((_name, step)) = access.next_entry::<String, AnalysisStepResult>()? {
                    steps.push(step);
                }
                Ok(steps)
            }
        }

        deserializer.deserialize_map(StepsVisitor)
    }
}
