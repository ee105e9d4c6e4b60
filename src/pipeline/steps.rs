//! The ordered analysis steps and their chunk windows.
//!
//! A step is described by a [`StepDescriptor`]: name, required output
//! fields, instruction template and chunk window. The orchestrator runs any
//! ordered list of descriptors; [`default_steps`] is the standard ten-step
//! judgment sequence, derived from the closed [`LegalStep`] enum so every
//! step is covered by an exhaustive `match` rather than a string lookup.
//!
//! ## Chunk windows are positional
//!
//! [`select_chunks`] picks at most `max_chunks_per_step` chunks by position
//! in the document, not by relevance: the front for metadata and summary,
//! the middle for narrative steps, the tail for the court's reasoning.

use crate::model::JudgmentChunk;
use crate::prompts;
use serde::{Deserialize, Serialize};

/// Which part of the document a step reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkWindow {
    /// First chunks: title page, parties, coram.
    Front,
    /// Chunks centred on the middle of the document.
    Middle,
    /// Last chunks: analysis, holdings, operative order.
    Tail,
}

/// One step of the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub name: String,
    /// Top-level fields the parsed output should contain.
    pub required_fields: Vec<String>,
    pub instructions: String,
    pub window: ChunkWindow,
}

impl StepDescriptor {
    pub fn new(
        name: impl Into<String>,
        window: ChunkWindow,
        required_fields: &[&str],
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            required_fields: required_fields.iter().map(|f| f.to_string()).collect(),
            instructions: instructions.into(),
            window,
        }
    }
}

/// The standard judgment analysis steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalStep {
    Metadata,
    Facts,
    Timeline,
    Issues,
    Arguments,
    Ratio,
    Obiter,
    Statutes,
    Precedents,
    Summary,
}

impl LegalStep {
    pub const ALL: [LegalStep; 10] = [
        LegalStep::Metadata,
        LegalStep::Facts,
        LegalStep::Timeline,
        LegalStep::Issues,
        LegalStep::Arguments,
        LegalStep::Ratio,
        LegalStep::Obiter,
        LegalStep::Statutes,
        LegalStep::Precedents,
        LegalStep::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LegalStep::Metadata => "metadata",
            LegalStep::Facts => "facts",
            LegalStep::Timeline => "timeline",
            LegalStep::Issues => "issues",
            LegalStep::Arguments => "arguments",
            LegalStep::Ratio => "ratio",
            LegalStep::Obiter => "obiter",
            LegalStep::Statutes => "statutes",
            LegalStep::Precedents => "precedents",
            LegalStep::Summary => "summary",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    pub fn window(&self) -> ChunkWindow {
        match self {
            LegalStep::Metadata | LegalStep::Summary => ChunkWindow::Front,
            LegalStep::Facts | LegalStep::Timeline | LegalStep::Issues | LegalStep::Arguments => {
                ChunkWindow::Middle
            }
            LegalStep::Ratio | LegalStep::Obiter | LegalStep::Statutes | LegalStep::Precedents => {
                ChunkWindow::Tail
            }
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            LegalStep::Metadata => &["case_name", "court", "date"],
            LegalStep::Facts => &["facts"],
            LegalStep::Timeline => &["events"],
            LegalStep::Issues => &["issues"],
            LegalStep::Arguments => &["arguments"],
            LegalStep::Ratio => &["ratio_decidendi"],
            LegalStep::Obiter => &["obiter_dicta"],
            LegalStep::Statutes => &["statutes"],
            LegalStep::Precedents => &["precedents"],
            LegalStep::Summary => &["summary"],
        }
    }

    pub fn instructions(&self) -> &'static str {
        match self {
            LegalStep::Metadata => prompts::METADATA_INSTRUCTIONS,
            LegalStep::Facts => prompts::FACTS_INSTRUCTIONS,
            LegalStep::Timeline => prompts::TIMELINE_INSTRUCTIONS,
            LegalStep::Issues => prompts::ISSUES_INSTRUCTIONS,
            LegalStep::Arguments => prompts::ARGUMENTS_INSTRUCTIONS,
            LegalStep::Ratio => prompts::RATIO_INSTRUCTIONS,
            LegalStep::Obiter => prompts::OBITER_INSTRUCTIONS,
            LegalStep::Statutes => prompts::STATUTES_INSTRUCTIONS,
            LegalStep::Precedents => prompts::PRECEDENTS_INSTRUCTIONS,
            LegalStep::Summary => prompts::SUMMARY_INSTRUCTIONS,
        }
    }

    pub fn descriptor(&self) -> StepDescriptor {
        StepDescriptor::new(
            self.as_str(),
            self.window(),
            self.required_fields(),
            self.instructions(),
        )
    }
}

/// metadata → facts → timeline → issues → arguments → ratio → obiter →
/// statutes → precedents → summary.
pub fn default_steps() -> Vec<StepDescriptor> {
    LegalStep::ALL.iter().map(LegalStep::descriptor).collect()
}

/// Pick the chunks a step reads.
pub fn select_chunks(chunks: &[JudgmentChunk], window: ChunkWindow, max: usize) -> &[JudgmentChunk] {
    let len = chunks.len();
    let max = max.max(1);
    if len <= max {
        return chunks;
    }
    let start = match window {
        ChunkWindow::Front => 0,
        ChunkWindow::Middle => (len - max) / 2,
        ChunkWindow::Tail => len - max,
    };
    &chunks[start..start + max]
}
