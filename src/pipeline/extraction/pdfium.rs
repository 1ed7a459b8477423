//! Page rasterization via PDFium.
//!
//! `PdfiumRenderer` is stateless (`Send + Sync`). Each operation loads a
//! fresh `Pdfium` handle because the upstream type is `!Send`; the OS caches
//! the dynamic library, so repeat loads are near-free. Scanned transcripts are
//! rasterized at 200 and 300 dpi for OCR.

use std::io::Cursor;
use std::path::PathBuf;

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::types::PdfPageRenderer;
use super::ExtractionError;

/// Longest edge of a rendered page, in pixels.
const MAX_DIMENSION_PX: u32 = 4096;

const POINTS_PER_INCH: f32 = 72.0;

/// Environment variable naming the PDFium library file.
pub const PDFIUM_PATH_VAR: &str = "PDFIUM_DYNAMIC_LIB_PATH";

/// Rasterizes PDF pages to grayscale PNG with PDFium.
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    /// Fails when no PDFium library can be bound.
    pub fn new() -> Result<Self, ExtractionError> {
        load_pdfium()?;
        Ok(Self)
    }
}

fn load_error(reason: String) -> ExtractionError {
    ExtractionError::PdfRendering { page: 0, reason }
}

/// Directories next to the executable that may hold a bundled PDFium.
fn bundled_library_dirs() -> Vec<PathBuf> {
    let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
    else {
        return Vec::new();
    };
    let lib_dir = exe_dir.join("..").join("lib");
    vec![exe_dir, lib_dir]
}

/// Bind PDFium from `PDFIUM_DYNAMIC_LIB_PATH`, then from the executable's
/// directory or `../lib`, then from the system search path.
fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var(PDFIUM_PATH_VAR) {
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| load_error(format!("cannot load PDFium from {path}: {e}")))?;
        debug!(path = %path, "PDFium bound from {PDFIUM_PATH_VAR}");
        return Ok(Pdfium::new(bindings));
    }

    for dir in bundled_library_dirs() {
        let candidate = Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&candidate) {
            debug!(dir = %dir.display(), "PDFium bound from bundled directory");
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| load_error(format!("no PDFium library found (set {PDFIUM_PATH_VAR}): {e}")))
}

fn open_document<'a>(pdfium: &'a Pdfium, pdf_bytes: &'a [u8]) -> Result<PdfDocument<'a>, ExtractionError> {
    pdfium.load_pdf_from_byte_slice(pdf_bytes, None).map_err(|e| {
        let message = e.to_string();
        let lower = message.to_lowercase();
        if lower.contains("password") || lower.contains("encrypt") {
            ExtractionError::PdfEncrypted
        } else {
            load_error(format!("unreadable PDF: {message}"))
        }
    })
}

/// Pixel size of a page rendered at `dpi`. The longer edge is capped at
/// `MAX_DIMENSION_PX` keeping the aspect ratio; both edges are at least 1.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let px_per_point = dpi as f32 / POINTS_PER_INCH;
    let width = (width_points * px_per_point).max(1.0);
    let height = (height_points * px_per_point).max(1.0);
    let shrink = (MAX_DIMENSION_PX as f32 / width.max(height)).min(1.0);
    let fit = |edge: f32| ((edge * shrink) as u32).clamp(1, MAX_DIMENSION_PX);
    (fit(width), fit(height))
}

impl PdfPageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = open_document(&pdfium, pdf_bytes)?;
        Ok(usize::from(document.pages().len()))
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        let render_error = |reason: String| ExtractionError::PdfRendering {
            page: page_number,
            reason,
        };

        let pdfium = load_pdfium()?;
        let document = open_document(&pdfium, pdf_bytes)?;
        let pages = document.pages();
        let page = u16::try_from(page_number)
            .ok()
            .and_then(|index| pages.get(index).ok())
            .ok_or_else(|| render_error(format!("no page {page_number} in {} pages", pages.len())))?;

        let (width_points, height_points) = (page.width().value, page.height().value);
        let (width, height) = compute_render_dimensions(width_points, height_points, dpi);
        if width_points.max(height_points) * dpi as f32 / POINTS_PER_INCH > MAX_DIMENSION_PX as f32 {
            warn!(page = page_number, dpi, width, height, "Page capped at {MAX_DIMENSION_PX}px");
        }

        let bitmap = page
            .render_with_config(
                &PdfRenderConfig::new()
                    .set_target_width(width as i32)
                    .set_maximum_height(height as i32),
            )
            .map_err(|e| render_error(format!("rasterization failed: {e}")))?;

        let mut png = Cursor::new(Vec::new());
        bitmap
            .as_image()
            .grayscale()
            .write_to(&mut png, ImageOutputFormat::Png)
            .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
        let png = png.into_inner();

        debug!(page = page_number, dpi, width, height, bytes = png.len(), "Page rasterized");
        Ok(png)
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Mock renderer: page `i` (0-based) renders to the bytes `mock-page-{i+1}`,
/// so a `MockOcrEngine` can script responses per page.
pub struct MockPdfPageRenderer {
    page_count: usize,
    fail_all: bool,
    failing_dpis: Vec<u32>,
}

impl MockPdfPageRenderer {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            fail_all: false,
            failing_dpis: Vec::new(),
        }
    }

    /// Renderer that fails at every resolution.
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::new(0)
        }
    }

    /// Fail rendering at the given resolutions only.
    pub fn failing_at(mut self, dpis: &[u32]) -> Self {
        self.failing_dpis = dpis.to_vec();
        self
    }

    fn fails_at(&self, dpi: u32) -> bool {
        self.fail_all || self.failing_dpis.contains(&dpi)
    }
}

/// Bytes the mock renderer emits for a 1-based page number.
pub fn mock_page_image(page_number: usize) -> Vec<u8> {
    format!("mock-page-{page_number}").into_bytes()
}

impl PdfPageRenderer for MockPdfPageRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        if self.fail_all {
            return Err(ExtractionError::PdfRendering {
                page: 0,
                reason: "mock load failure".into(),
            });
        }
        Ok(self.page_count)
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        if self.fails_at(dpi) {
            return Err(ExtractionError::PdfRendering {
                page: page_number,
                reason: format!("mock rendering failure at {dpi} dpi"),
            });
        }
        if page_number >= self.page_count {
            return Err(ExtractionError::PdfRendering {
                page: page_number,
                reason: format!(
                    "Page {page_number} out of range (mock has {} pages)",
                    self.page_count
                ),
            });
        }
        Ok(mock_page_image(page_number + 1))
    }
}
