//! Paragraph-anchored chunking of extracted pages.
//!
//! ## Paragraphs
//!
//! Each page is split on blank lines, then each block is split again before
//! any line that opens with a legal sub-paragraph marker (`12. `, `(a) `,
//! `(iv) `, `(3) `, `B. `). Paragraphs are trimmed; empty ones are dropped
//! and do not advance the paragraph counter. The counter runs across the
//! whole document, so `paragraph_number` is unique per judgment.
//!
//! ## Windows
//!
//! A paragraph of at most `max_chunk_size` characters is one chunk. Longer
//! paragraphs are cut into windows of up to `max_chunk_size` characters.
//! Each window end (except the last) is pulled back to just after the
//! nearest `.`, `!` or `?` within the last `sentence_search_window`
//! characters, provided the window keeps at least `min_chunk_size`
//! characters. The next window starts `overlap_size` characters before the
//! previous end, so the tail of chunk *i* is exactly the head of chunk *i+1*.
//!
//! All offsets are character offsets, never byte offsets.

use crate::config::ChunkingConfig;
use crate::model::{
    ChunkAnchor, ChunkMetadata, ChunkingResult, ChunkingStatistics, JudgmentChunk, PageContent,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

static RE_BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

static RE_SUBPARAGRAPH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d+\.\s|\((?:[0-9]+|[a-zA-Z]|[ivxlc]+)\)\s|[A-Z]\.\s)").unwrap()
});

/// Splits pages into anchored chunks for one judgment.
#[derive(Debug, Clone)]
pub struct JudgmentChunker {
    judgment_id: String,
    config: ChunkingConfig,
}

impl JudgmentChunker {
    pub fn new(judgment_id: impl Into<String>, config: ChunkingConfig) -> Self {
        Self {
            judgment_id: judgment_id.into(),
            config,
        }
    }

    pub fn judgment_id(&self) -> &str {
        &self.judgment_id
    }

    /// Chunk every page in reading order.
    pub fn chunk_pages(&self, pages: &[PageContent]) -> ChunkingResult {
        let mut chunks = Vec::new();
        let mut paragraph_number = 0usize;

        for page in pages {
            for paragraph in split_paragraphs(&page.text) {
                paragraph_number += 1;
                let chars: Vec<char> = paragraph.chars().collect();
                let windows = split_windows(&chars, &self.config);
                debug!(
                    "Page {} paragraph {}: {} chars → {} chunk(s)",
                    page.page_number,
                    paragraph_number,
                    chars.len(),
                    windows.len()
                );

                for (start, end) in windows {
                    let text: String = chars[start..end].iter().collect();
                    let chunk_id = chunk_id(
                        &self.judgment_id,
                        page.page_number,
                        paragraph_number,
                        chunks.len(),
                    );
                    chunks.push(JudgmentChunk {
                        chunk_id,
                        metadata: ChunkMetadata {
                            word_count: text.split_whitespace().count(),
                            char_count: end - start,
                        },
                        text,
                        anchor: ChunkAnchor {
                            page_number: page.page_number,
                            paragraph_number,
                            start_char: start,
                            end_char: end,
                        },
                    });
                }
            }
        }

        let total_chars: usize = chunks.iter().map(|c| c.metadata.char_count).sum();
        let average_chunk_size = if chunks.is_empty() {
            0
        } else {
            (total_chars as f64 / chunks.len() as f64).round() as usize
        };

        let statistics = ChunkingStatistics {
            total_pages: pages.len(),
            total_paragraphs: paragraph_number,
            average_chunk_size,
        };

        info!(
            "Chunked judgment {}: {} pages, {} paragraphs, {} chunks (avg {} chars)",
            self.judgment_id,
            statistics.total_pages,
            statistics.total_paragraphs,
            chunks.len(),
            statistics.average_chunk_size
        );

        ChunkingResult {
            total_chunks: chunks.len(),
            chunks,
            statistics,
        }
    }
}

/// Deterministic chunk id: same judgment, page, paragraph and running index
/// always give the same id.
pub fn chunk_id(judgment_id: &str, page: usize, paragraph: usize, index: usize) -> String {
    format!("{judgment_id}_p{page}_para{paragraph}_c{index}")
}

/// Split one page of text into trimmed, non-empty paragraphs.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let normalised = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut paragraphs = Vec::new();

    for block in RE_BLANK_LINE.split(&normalised) {
        let mut current: Vec<&str> = Vec::new();
        for line in block.lines() {
            let has_content = current.iter().any(|l| !l.trim().is_empty());
            if has_content && RE_SUBPARAGRAPH.is_match(line) {
                push_paragraph(&mut paragraphs, &current);
                current.clear();
            }
            current.push(line);
        }
        push_paragraph(&mut paragraphs, &current);
    }

    paragraphs
}

fn push_paragraph(out: &mut Vec<String>, lines: &[&str]) {
    let joined = lines.join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Compute `(start, end)` character windows for one paragraph.
pub fn split_windows(chars: &[char], config: &ChunkingConfig) -> Vec<(usize, usize)> {
    let len = chars.len();
    if len <= config.max_chunk_size {
        return vec![(0, len)];
    }

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let mut end = (start + config.max_chunk_size).min(len);
        if end < len {
            if let Some(boundary) = sentence_boundary(chars, start, end, config) {
                end = boundary;
            }
        }
        windows.push((start, end));
        if end >= len {
            break;
        }
        // min_chunk_size > overlap_size keeps this strictly increasing.
        start = end.saturating_sub(config.overlap_size).max(start + 1);
    }
    windows
}

/// Position just after the last sentence terminator in the search window.
fn sentence_boundary(
    chars: &[char],
    start: usize,
    end: usize,
    config: &ChunkingConfig,
) -> Option<usize> {
    let floor = (start + config.min_chunk_size).max(end.saturating_sub(config.sentence_search_window));
    if floor >= end {
        return None;
    }
    (floor..end)
        .rev()
        .find(|&i| is_sentence_end(chars, i))
        .map(|i| i + 1)
}

fn is_sentence_end(chars: &[char], i: usize) -> bool {
    matches!(chars[i], '.' | '!' | '?') && chars.get(i + 1).map_or(true, |c| c.is_whitespace())
}
