//! Extraction: PDF bytes → per-page text.
//!
//! ## Digital or OCR?
//!
//! The embedded text layer is read first. If it holds at least
//! `min_text_length × pages` characters the digital result is kept;
//! otherwise the document is treated as scanned and every page goes
//! through OCR ([`select_method`]).
//!
//! ## Digital page boundaries are approximate
//!
//! `pdf-extract` returns one string for the whole document, without page
//! breaks. Lines are distributed over pages proportionally
//! (`ceil(lines / pages)` per page, see [`distribute_lines`]). Anchors on
//! digitally extracted text can therefore be off by a page near boundaries.
//!
//! ## OCR is all-or-nothing
//!
//! Pages are rendered and recognised one at a time by a single worker. The
//! rendered PNGs live in a `TempDir` owned by the call, so they are removed
//! on every exit path. The first page failure aborts the extraction; no
//! partial [`ExtractionResult`] is produced.

use crate::config::ExtractionConfig;
use crate::error::ExtractionFailure;
use crate::model::{DocumentMetadata, ExtractionMethod, ExtractionResult, PageContent};
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use lopdf::{Dictionary, Document, Object};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the embedded text layer yielded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextLayerContent {
    pub page_count: usize,
    /// Whole-document text, pages not delimited.
    pub text: String,
    pub metadata: Option<DocumentMetadata>,
}

/// Reads the embedded text layer of a PDF. Blocking.
pub trait TextLayer: Send + Sync {
    fn read(&self, pdf: &[u8]) -> Result<TextLayerContent, ExtractionFailure>;
}

/// `lopdf` for structure and document info, `pdf-extract` for text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextLayer;

impl TextLayer for PdfTextLayer {
    fn read(&self, pdf: &[u8]) -> Result<TextLayerContent, ExtractionFailure> {
        let document = Document::load_mem(pdf).map_err(|e| ExtractionFailure::CorruptPdf {
            detail: e.to_string(),
        })?;
        let page_count = document.get_pages().len();
        let metadata = read_info(&document);

        // A text layer that cannot be decoded is treated as empty so the
        // density check sends the document to OCR.
        let text = match pdf_extract::extract_text_from_mem(pdf) {
            Ok(text) => text,
            Err(e) => {
                warn!("Text layer unreadable, treating as empty: {}", e);
                String::new()
            }
        };

        Ok(TextLayerContent {
            page_count,
            text,
            metadata,
        })
    }
}

fn read_info(document: &Document) -> Option<DocumentMetadata> {
    let info: &Dictionary = match document.trailer.get(b"Info").ok()? {
        Object::Reference(id) => document.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    let field = |key: &[u8]| match info.get(key) {
        Ok(Object::String(bytes, _)) => Some(decode_pdf_string(bytes)).filter(|s| !s.trim().is_empty()),
        _ => None,
    };
    let metadata = DocumentMetadata {
        title: field(b"Title"),
        author: field(b"Author"),
        subject: field(b"Subject"),
        keywords: field(b"Keywords"),
    };
    (!metadata.is_empty()).then_some(metadata)
}

/// Decode a PDF text string: UTF-16BE with BOM, else UTF-8, else Latin-1.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Digital if `total_chars ≥ min_text_length × page_count`, else OCR.
pub fn select_method(total_chars: usize, page_count: usize, min_text_length: usize) -> ExtractionMethod {
    if total_chars >= min_text_length.saturating_mul(page_count) {
        ExtractionMethod::Digital
    } else {
        ExtractionMethod::Ocr
    }
}

/// Split `text` into exactly `page_count` pages of `ceil(lines / pages)` lines each.
///
/// Trailing pages are empty when the text runs out early.
pub fn distribute_lines(text: &str, page_count: usize) -> Vec<String> {
    if page_count == 0 {
        return Vec::new();
    }
    let lines: Vec<&str> = text.split('\n').collect();
    let per_page = lines.len().div_ceil(page_count).max(1);
    (0..page_count)
        .map(|i| {
            let start = (i * per_page).min(lines.len());
            let end = ((i + 1) * per_page).min(lines.len());
            lines[start..end].join("\n")
        })
        .collect()
}

/// Ensure `bytes` begins with `%PDF`.
pub fn check_magic(bytes: &[u8]) -> Result<(), ExtractionFailure> {
    if bytes.starts_with(b"%PDF") {
        Ok(())
    } else {
        Err(ExtractionFailure::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        })
    }
}

fn join_failure(e: JoinError, what: &str) -> ExtractionFailure {
    if e.is_panic() {
        ExtractionFailure::CorruptPdf {
            detail: format!("{what} panicked while parsing the document"),
        }
    } else {
        ExtractionFailure::Internal(format!("{what} task failed: {e}"))
    }
}

/// Turns document bytes into an [`ExtractionResult`].
#[derive(Clone)]
pub struct Extractor {
    config: ExtractionConfig,
    text_layer: Arc<dyn TextLayer>,
    rasterizer: Arc<dyn PageRasterizer>,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl Extractor {
    /// Extractor with the default text layer and pdfium rasteriser and no
    /// OCR engine. Scanned documents fail with `OcrEngineUnavailable`
    /// until one is supplied with [`Extractor::with_ocr_engine`].
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            text_layer: Arc::new(PdfTextLayer),
            rasterizer: Arc::new(PdfiumRasterizer::new(&config)),
            ocr: None,
        }
    }

    pub fn with_text_layer(mut self, text_layer: Arc<dyn TextLayer>) -> Self {
        self.text_layer = text_layer;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    /// Read the text layer only, without the density decision or OCR.
    pub async fn read_text_layer(&self, bytes: &[u8]) -> Result<TextLayerContent, ExtractionFailure> {
        check_magic(bytes)?;
        let shared: Arc<[u8]> = Arc::from(bytes);
        let layer = Arc::clone(&self.text_layer);
        tokio::task::spawn_blocking(move || layer.read(&shared))
            .await
            .map_err(|e| join_failure(e, "text layer"))?
    }

    pub async fn extract(
        &self,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractionFailure> {
        if cancel.is_cancelled() {
            return Err(ExtractionFailure::Cancelled);
        }
        let layer = self.read_text_layer(bytes).await?;
        if layer.page_count == 0 {
            return Err(ExtractionFailure::NoPages);
        }

        let total_chars = layer.text.trim().chars().count();
        let method = select_method(total_chars, layer.page_count, self.config.min_text_length);
        info!(
            "Text layer: {} pages, {} chars → {} extraction",
            layer.page_count,
            total_chars,
            method.as_str()
        );

        let pages = match method {
            ExtractionMethod::Digital => distribute_lines(&layer.text, layer.page_count)
                .into_iter()
                .enumerate()
                .map(|(i, text)| PageContent {
                    page_number: i + 1,
                    text,
                    extraction_method: ExtractionMethod::Digital,
                })
                .collect(),
            _ => {
                warn!(
                    "Text layer below {} chars/page, falling back to OCR for {} pages",
                    self.config.min_text_length, layer.page_count
                );
                self.ocr_pages(bytes, layer.page_count, cancel).await?
            }
        };

        Ok(ExtractionResult {
            extraction_method: ExtractionMethod::summarize(&pages).unwrap_or(method),
            total_pages: pages.len(),
            pages,
            metadata: layer.metadata,
        })
    }

    async fn ocr_pages(
        &self,
        bytes: &[u8],
        page_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageContent>, ExtractionFailure> {
        let engine = self.ocr.as_ref().ok_or_else(|| {
            ExtractionFailure::OcrEngineUnavailable("no OCR engine configured for scanned documents".into())
        })?;

        let scratch = TempDir::new().map_err(|e| ExtractionFailure::TempStorage(e.to_string()))?;
        debug!("OCR scratch directory: {}", scratch.path().display());

        let shared: Arc<[u8]> = Arc::from(bytes);
        let mut worker = engine.acquire().await?;
        let mut pages = Vec::with_capacity(page_count);

        for page_number in 1..=page_count {
            if cancel.is_cancelled() {
                return Err(ExtractionFailure::Cancelled);
            }

            let rasterizer = Arc::clone(&self.rasterizer);
            let pdf = Arc::clone(&shared);
            let dir = scratch.path().to_path_buf();
            let raster = tokio::task::spawn_blocking(move || rasterizer.render_page(&pdf, page_number, &dir))
                .await
                .map_err(|e| match join_failure(e, "rasteriser") {
                    ExtractionFailure::CorruptPdf { detail } => ExtractionFailure::RasterisationFailed {
                        page: page_number,
                        detail,
                    },
                    other => other,
                })??;

            if cancel.is_cancelled() {
                return Err(ExtractionFailure::Cancelled);
            }

            let text = worker.recognize(&raster).await?;
            debug!("OCR page {}/{}: {} chars", page_number, page_count, text.len());
            pages.push(PageContent {
                page_number,
                text,
                extraction_method: ExtractionMethod::Ocr,
            });
        }

        drop(worker);
        if let Err(e) = scratch.close() {
            warn!("Could not remove OCR scratch directory: {}", e);
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::OcrWorker;
    use crate::pipeline::render::RasterizedPage;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedTextLayer {
        pages: usize,
        text: String,
    }

    impl TextLayer for FixedTextLayer {
        fn read(&self, _pdf: &[u8]) -> Result<TextLayerContent, ExtractionFailure> {
            Ok(TextLayerContent {
                page_count: self.pages,
                text: self.text.clone(),
                metadata: None,
            })
        }
    }

    /// Writes a placeholder file per page and remembers the scratch dir.
    #[derive(Default)]
    struct FileRasterizer {
        dirs: Mutex<Vec<PathBuf>>,
    }

    impl PageRasterizer for FileRasterizer {
        fn render_page(&self, _pdf: &[u8], page_number: usize, out_dir: &Path) -> Result<RasterizedPage, ExtractionFailure> {
            self.dirs.lock().unwrap().push(out_dir.to_path_buf());
            let path = out_dir.join(format!("page-{page_number}.png"));
            std::fs::write(&path, b"png").map_err(|e| ExtractionFailure::TempStorage(e.to_string()))?;
            Ok(RasterizedPage {
                page_number,
                path,
                width: 1,
                height: 1,
            })
        }
    }

    /// Returns "text of page N", failing on `fail_on` if set.
    struct ScriptedOcr {
        fail_on: Option<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
        acquired: AtomicUsize,
        released: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedOcr {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                fail_on,
                cancel_after: None,
                acquired: AtomicUsize::new(0),
                released: Arc::new(AtomicUsize::new(0)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct ScriptedWorker {
        fail_on: Option<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
        released: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OcrEngine for ScriptedOcr {
        async fn acquire(&self) -> Result<Box<dyn OcrWorker>, ExtractionFailure> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedWorker {
                fail_on: self.fail_on,
                cancel_after: self.cancel_after.clone(),
                released: Arc::clone(&self.released),
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    #[async_trait]
    impl OcrWorker for ScriptedWorker {
        async fn recognize(&mut self, page: &RasterizedPage) -> Result<String, ExtractionFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(page.path.exists());
            if let Some((n, ref token)) = self.cancel_after {
                if page.page_number == n {
                    token.cancel();
                }
            }
            if self.fail_on == Some(page.page_number) {
                return Err(ExtractionFailure::OcrFailed {
                    page: page.page_number,
                    detail: "unreadable".into(),
                });
            }
            Ok(format!("text of page {}", page.page_number))
        }
    }

    impl Drop for ScriptedWorker {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    const PDF: &[u8] = b"%PDF-1.4 test";

    fn extractor(text: &str, pages: usize, ocr: Option<Arc<ScriptedOcr>>, raster: Arc<FileRasterizer>) -> Extractor {
        let mut ex = Extractor::new(ExtractionConfig::default())
            .with_text_layer(Arc::new(FixedTextLayer {
                pages,
                text: text.to_string(),
            }))
            .with_rasterizer(raster);
        if let Some(ocr) = ocr {
            ex = ex.with_ocr_engine(ocr);
        }
        ex
    }

    #[test]
    fn threshold_is_inclusive() {
        assert_eq!(select_method(99, 2, 50), ExtractionMethod::Ocr);
        assert_eq!(select_method(100, 2, 50), ExtractionMethod::Digital);
        assert_eq!(select_method(0, 1, 50), ExtractionMethod::Ocr);
    }

    #[test]
    fn lines_are_distributed_proportionally() {
        let pages = distribute_lines("a\nb\nc\nd\ne", 2);
        assert_eq!(pages, vec!["a\nb\nc", "d\ne"]);
        let pages = distribute_lines("only", 3);
        assert_eq!(pages, vec!["only", "", ""]);
    }

    #[test]
    fn magic_check_reports_first_bytes() {
        assert!(check_magic(b"%PDF-1.7").is_ok());
        assert_eq!(
            check_magic(b"PK\x03\x04zip").unwrap_err(),
            ExtractionFailure::NotAPdf {
                magic: b"PK\x03\x04".to_vec()
            }
        );
    }

    #[test]
    fn pdf_strings_decode_utf16() {
        assert_eq!(decode_pdf_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9]), "Aé");
        assert_eq!(decode_pdf_string(b"Plain"), "Plain");
    }

    #[tokio::test]
    async fn dense_text_layer_stays_digital() {
        let text = "x".repeat(60) + "\n" + &"y".repeat(60);
        let ex = extractor(&text, 2, None, Arc::new(FileRasterizer::default()));
        let result = ex.extract(PDF, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.extraction_method, ExtractionMethod::Digital);
        assert_eq!(result.total_pages, 2);
        assert_eq!(result.pages[1].text, "y".repeat(60));
    }

    #[tokio::test]
    async fn sparse_text_layer_goes_to_ocr_and_cleans_up() {
        let raster = Arc::new(FileRasterizer::default());
        let ocr = Arc::new(ScriptedOcr::new(None));
        let ex = extractor("tiny", 3, Some(ocr.clone()), raster.clone());
        let result = ex.extract(PDF, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.extraction_method, ExtractionMethod::Ocr);
        assert_eq!(result.pages[2].text, "text of page 3");
        assert_eq!(ocr.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(ocr.released.load(Ordering::SeqCst), 1);
        let dir = raster.dirs.lock().unwrap()[0].clone();
        assert!(!dir.exists(), "scratch dir should be removed");
    }

    #[tokio::test]
    async fn one_failed_page_aborts_everything() {
        let raster = Arc::new(FileRasterizer::default());
        let ocr = Arc::new(ScriptedOcr::new(Some(2)));
        let ex = extractor("", 4, Some(ocr.clone()), raster.clone());
        let err = ex.extract(PDF, &CancellationToken::new()).await.unwrap_err();

        assert_eq!(
            err,
            ExtractionFailure::OcrFailed {
                page: 2,
                detail: "unreadable".into()
            }
        );
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ocr.released.load(Ordering::SeqCst), 1);
        let dir = raster.dirs.lock().unwrap()[0].clone();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn cancellation_stops_at_page_boundary() {
        let raster = Arc::new(FileRasterizer::default());
        let cancel = CancellationToken::new();
        let mut ocr = ScriptedOcr::new(None);
        ocr.cancel_after = Some((1, cancel.clone()));
        let ocr = Arc::new(ocr);
        let ex = extractor("", 3, Some(ocr.clone()), raster.clone());

        let err = ex.extract(PDF, &cancel).await.unwrap_err();
        assert_eq!(err, ExtractionFailure::Cancelled);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ocr.released.load(Ordering::SeqCst), 1);
        let dir = raster.dirs.lock().unwrap()[0].clone();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn scanned_document_without_engine_is_an_error() {
        let ex = extractor("", 1, None, Arc::new(FileRasterizer::default()));
        let err = ex.extract(PDF, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ExtractionFailure::OcrEngineUnavailable(_)));
    }

    #[tokio::test]
    async fn non_pdf_and_empty_documents_fail() {
        let ex = extractor("text", 0, None, Arc::new(FileRasterizer::default()));
        assert!(matches!(
            ex.extract(b"hello", &CancellationToken::new()).await,
            Err(ExtractionFailure::NotAPdf { .. })
        ));
        assert_eq!(
            ex.extract(PDF, &CancellationToken::new()).await.unwrap_err(),
            ExtractionFailure::NoPages
        );
    }
}
