//! Page rasterisation for the OCR path.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! The extractor calls [`PageRasterizer::render_page`] inside
//! `tokio::task::spawn_blocking` so Tokio worker threads never stall on
//! CPU-heavy rendering.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 exhibit at 300 DPI would produce a
//! 14,000 × 19,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded.

use crate::config::ExtractionConfig;
use crate::error::ExtractionFailure;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// One rendered page on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterizedPage {
    /// 1-indexed.
    pub page_number: usize,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Renders single pages of a PDF to PNG files.
///
/// Implementations are blocking and must be callable from any thread.
pub trait PageRasterizer: Send + Sync {
    /// Render page `page_number` (1-indexed) of `pdf` into a PNG inside `out_dir`.
    fn render_page(
        &self,
        pdf: &[u8],
        page_number: usize,
        out_dir: &Path,
    ) -> Result<RasterizedPage, ExtractionFailure>;
}

/// pdfium-backed rasteriser.
///
/// Holds no pdfium handle: `Pdfium` is `!Send`, so each call binds the
/// library afresh. The OS caches the `dlopen`, so repeat binds are cheap.
#[derive(Debug, Clone, Copy)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.ocr_dpi,
            max_pixels: config.max_rendered_pixels,
        }
    }
}

impl Default for PdfiumRasterizer {
    fn default() -> Self {
        Self::new(&ExtractionConfig::default())
    }
}

/// Bind pdfium from `PDFIUM_LIB_PATH` if set, else from the system library path.
fn load_pdfium() -> Result<Pdfium, ExtractionFailure> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        debug!("Binding pdfium from PDFIUM_LIB_PATH={}", path);
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| ExtractionFailure::PdfiumBindingFailed(format!("{path}: {e}")))?;
        return Ok(Pdfium::new(bindings));
    }
    let bindings =
        Pdfium::bind_to_system_library().map_err(|e| ExtractionFailure::PdfiumBindingFailed(e.to_string()))?;
    Ok(Pdfium::new(bindings))
}

/// Pixel size for a page of `width_pt × height_pt` points at `dpi`, with the
/// longest edge capped at `max_pixels`. Aspect ratio is preserved.
pub fn render_dimensions(width_pt: f32, height_pt: f32, dpi: u32, max_pixels: u32) -> (u32, u32) {
    let w = (width_pt * dpi as f32 / POINTS_PER_INCH).max(1.0);
    let h = (height_pt * dpi as f32 / POINTS_PER_INCH).max(1.0);
    let cap = max_pixels.max(1) as f32;
    if w.max(h) <= cap {
        (w as u32, h as u32)
    } else if w >= h {
        (cap as u32, ((h * cap / w) as u32).max(1))
    } else {
        (((w * cap / h) as u32).max(1), cap as u32)
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn render_page(
        &self,
        pdf: &[u8],
        page_number: usize,
        out_dir: &Path,
    ) -> Result<RasterizedPage, ExtractionFailure> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| ExtractionFailure::CorruptPdf {
                detail: format!("{e:?}"),
            })?;

        let failed = |detail: String| ExtractionFailure::RasterisationFailed {
            page: page_number,
            detail,
        };

        let index = page_number
            .checked_sub(1)
            .and_then(|i| u16::try_from(i).ok())
            .ok_or_else(|| failed(format!("page number {page_number} out of range")))?;
        let pages = document.pages();
        let page = pages.get(index).map_err(|e| failed(format!("{e:?}")))?;

        let (width, height) = render_dimensions(page.width().value, page.height().value, self.dpi, self.max_pixels);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_maximum_height(height as i32);

        let image = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{e:?}")))?
            .as_image();

        if image.width() > self.max_pixels || image.height() > self.max_pixels {
            warn!(
                "Page {} rendered at {}x{} px, above the {} px cap",
                page_number,
                image.width(),
                image.height(),
                self.max_pixels
            );
        }

        let path = out_dir.join(format!("page-{page_number:04}.png"));
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| ExtractionFailure::TempStorage(format!("{}: {e}", path.display())))?;

        debug!("Rendered page {} → {}x{} px", page_number, image.width(), image.height());

        Ok(RasterizedPage {
            page_number,
            path,
            width: image.width(),
            height: image.height(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_page_at_300_dpi() {
        // 8.5 × 11 in
        assert_eq!(render_dimensions(612.0, 792.0, 300, 4000), (2550, 3300));
    }

    #[test]
    fn longest_edge_is_capped() {
        let (w, h) = render_dimensions(612.0, 792.0, 600, 4000);
        assert_eq!(h, 4000);
        assert!(w < 4000);
        assert!((w as f32 / h as f32 - 612.0 / 792.0).abs() < 0.01);
    }

    #[test]
    fn degenerate_page_is_at_least_one_pixel() {
        assert_eq!(render_dimensions(0.0, 0.0, 300, 4000), (1, 1));
    }
}
