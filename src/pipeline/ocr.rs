//! OCR engines for scanned judgments.
//!
//! An [`OcrEngine`] hands out one [`OcrWorker`] per extraction call. The
//! worker is used sequentially, one page at a time (`&mut self`), and is
//! released when dropped: after the last page, on the first error, or on
//! cancellation.
//!
//! The default engine, [`VisionOcrEngine`], sends each rendered page to a
//! vision-capable model as a base64 PNG and asks for a plain transcription.

use crate::error::ExtractionFailure;
use crate::pipeline::render::RasterizedPage;
use crate::prompts::OCR_SYSTEM_PROMPT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Starts OCR workers.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Acquire a worker for the duration of one extraction.
    async fn acquire(&self) -> Result<Box<dyn OcrWorker>, ExtractionFailure>;
}

/// A single-use OCR session. Not shared across pages concurrently.
#[async_trait]
pub trait OcrWorker: Send {
    /// Transcribe one rendered page.
    async fn recognize(&mut self, page: &RasterizedPage) -> Result<String, ExtractionFailure>;
}

/// Encode a rendered page as a base64 PNG ready for the vision API.
///
/// `detail: "high"` lets GPT-4-class models tile the full page; with `low`
/// footnotes and paragraph numbers are lost.
pub fn encode_png(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded page image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}

/// Vision-model OCR through an `edgequake_llm` provider.
pub struct VisionOcrEngine {
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
    call_timeout: Duration,
}

impl VisionOcrEngine {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            max_tokens: 4096,
            call_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

#[async_trait]
impl OcrEngine for VisionOcrEngine {
    async fn acquire(&self) -> Result<Box<dyn OcrWorker>, ExtractionFailure> {
        debug!("Acquired vision OCR worker");
        Ok(Box::new(VisionOcrWorker {
            provider: Arc::clone(&self.provider),
            max_tokens: self.max_tokens,
            call_timeout: self.call_timeout,
            pages_done: 0,
        }))
    }
}

struct VisionOcrWorker {
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
    call_timeout: Duration,
    pages_done: usize,
}

#[async_trait]
impl OcrWorker for VisionOcrWorker {
    async fn recognize(&mut self, page: &RasterizedPage) -> Result<String, ExtractionFailure> {
        let start = Instant::now();
        let png = tokio::fs::read(&page.path)
            .await
            .map_err(|e| ExtractionFailure::TempStorage(format!("{}: {e}", page.path.display())))?;

        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images("", vec![encode_png(&png)]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = timeout(self.call_timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| ExtractionFailure::OcrFailed {
                page: page.page_number,
                detail: format!("timed out after {}s", self.call_timeout.as_secs()),
            })?
            .map_err(|e| ExtractionFailure::OcrFailed {
                page: page.page_number,
                detail: e.to_string(),
            })?;

        self.pages_done += 1;
        debug!(
            "OCR page {}: {} chars, {} output tokens, {:?}",
            page.page_number,
            response.content.len(),
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

impl Drop for VisionOcrWorker {
    fn drop(&mut self) {
        debug!("Released vision OCR worker after {} page(s)", self.pages_done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_png_wraps_base64() {
        let data = encode_png(b"\x89PNG\r\n\x1a\nfake");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).unwrap();
        assert!(decoded.starts_with(b"\x89PNG"));
    }
}
