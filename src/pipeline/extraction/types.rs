use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cache::compute_content_hash;
use super::ExtractionError;

/// Bounding box of a recognized fragment, in page pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn center_x(&self) -> f64 {
        self.x as f64 + self.width as f64 / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y as f64 + self.height as f64 / 2.0
    }
}

/// One OCR-recognized text fragment with its position on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

impl Token {
    pub fn new(text: &str, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            text: text.to_string(),
            confidence: 1.0,
            bounding_box: BoundingBox {
                x,
                y,
                width,
                height,
            },
        }
    }

    pub fn center_x(&self) -> f64 {
        self.bounding_box.center_x()
    }

    pub fn center_y(&self) -> f64 {
        self.bounding_box.center_y()
    }
}

/// Tesseract page segmentation mode (`--psm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageSegMode(pub u8);

impl PageSegMode {
    /// Single column of text of variable sizes.
    pub const SINGLE_COLUMN: Self = Self(4);
    /// Single uniform block of text.
    pub const SINGLE_BLOCK: Self = Self(6);
}

impl std::fmt::Display for PageSegMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "psm{}", self.0)
    }
}

/// Parameters of one OCR call.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrRequest {
    pub mode: PageSegMode,
    pub languages: String,
    pub timeout: Option<Duration>,
}

/// Text and positioned tokens recognized on one page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageRecognition {
    pub page_number: usize,
    pub text: String,
    pub tokens: Vec<Token>,
}

impl PageRecognition {
    pub fn empty(page_number: usize) -> Self {
        Self {
            page_number,
            ..Default::default()
        }
    }

    /// Non-empty trimmed text lines in reading order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine: Send + Sync {
    /// Plain text of the image, one recognized line per text line.
    fn recognize_text(&self, image_bytes: &[u8], request: &OcrRequest)
        -> Result<String, ExtractionError>;

    /// Word-level tokens with bounding boxes.
    fn recognize_tokens(
        &self,
        image_bytes: &[u8],
        request: &OcrRequest,
    ) -> Result<Vec<Token>, ExtractionError>;
}

/// Renders individual PDF pages to images.
pub trait PdfPageRenderer: Send + Sync {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError>;

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError>;

    /// Render pages in order, stopping after `max_pages` when set.
    fn render_pages(
        &self,
        pdf_bytes: &[u8],
        dpi: u32,
        max_pages: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, ExtractionError> {
        let count = self.page_count(pdf_bytes)?;
        let limit = max_pages.map_or(count, |m| m.min(count));
        (0..limit)
            .map(|page| self.render_page(pdf_bytes, page, dpi))
            .collect()
    }
}

/// An applicant document: display name plus immutable shared bytes.
///
/// Cloning is cheap; clones share the bytes and the lazily computed
/// content hash.
#[derive(Clone)]
pub struct Document {
    name: String,
    bytes: Arc<[u8]>,
    content_hash: Arc<OnceLock<String>>,
}

impl Document {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            content_hash: Arc::new(OnceLock::new()),
        }
    }

    /// Placeholder for a document that could not be read.
    pub fn missing(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn open(path: &Path) -> Result<Self, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 content hash, computed once per document.
    pub fn content_hash(&self) -> &str {
        self.content_hash
            .get_or_init(|| compute_content_hash(&self.bytes))
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_centroid_is_box_center() {
        let token = Token::new("ECTS", 100, 40, 50, 20);
        assert!((token.center_x() - 125.0).abs() < f64::EPSILON);
        assert!((token.center_y() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn page_lines_skip_blank_lines() {
        let page = PageRecognition {
            page_number: 1,
            text: "  Statistik I  \n\n   \nMathematik 8 CP\n".into(),
            tokens: vec![],
        };
        let lines: Vec<&str> = page.lines().collect();
        assert_eq!(lines, vec!["Statistik I", "Mathematik 8 CP"]);
    }

    #[test]
    fn document_clones_share_hash() {
        let doc = Document::new("transcript.pdf", b"%PDF-1.4 test".to_vec());
        let clone = doc.clone();
        assert_eq!(doc.content_hash(), clone.content_hash());
        assert_eq!(clone.name(), "transcript.pdf");
        assert_eq!(clone.len(), 13);
    }

    #[test]
    fn missing_document_is_empty() {
        let doc = Document::missing("gone.pdf");
        assert!(doc.is_empty());
        assert_eq!(doc.name(), "gone.pdf");
    }

    #[test]
    fn open_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zeugnis.pdf");
        std::fs::write(&path, b"bytes").unwrap();
        let doc = Document::open(&path).unwrap();
        assert_eq!(doc.name(), "zeugnis.pdf");
        assert_eq!(doc.bytes(), b"bytes");
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let err = Document::open(Path::new("/nonexistent/credcheck.pdf")).unwrap_err();
        assert!(matches!(err, ExtractionError::Io(_)));
    }

    #[test]
    fn page_seg_mode_deserializes_from_integer() {
        let modes: Vec<PageSegMode> = serde_json::from_str("[4, 6]").unwrap();
        assert_eq!(modes, vec![PageSegMode::SINGLE_COLUMN, PageSegMode::SINGLE_BLOCK]);
        assert_eq!(PageSegMode::SINGLE_BLOCK.to_string(), "psm6");
    }
}
