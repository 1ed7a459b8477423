use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::types::{BoundingBox, OcrEngine, OcrRequest, PageSegMode, Token};
use super::ExtractionError;

/// Tesseract-backed engine (feature `ocr`).
///
/// A fresh Tesseract handle is created per call, so one engine can serve
/// every page worker concurrently.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata_dir: std::path::PathBuf,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    /// Initialize with a tessdata directory. Transcripts are mostly German,
    /// so `deu.traineddata` is required alongside `eng.traineddata`.
    pub fn new(tessdata_dir: &std::path::Path) -> Result<Self, ExtractionError> {
        if !tessdata_dir.join("eng.traineddata").exists() {
            return Err(ExtractionError::TessdataNotFound(tessdata_dir.to_path_buf()));
        }
        if !tessdata_dir.join("deu.traineddata").exists() {
            tracing::warn!(
                "No German traineddata at {}, umlauts will be recognized poorly",
                tessdata_dir.display()
            );
        }
        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
        })
    }

    fn prepare(
        &self,
        image_bytes: &[u8],
        request: &OcrRequest,
    ) -> Result<tesseract::Tesseract, ExtractionError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| ExtractionError::OcrInit("Invalid tessdata path".into()))?;

        let tess = tesseract::Tesseract::new(Some(tessdata_str), Some(&request.languages))
            .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?;

        let tess = tess
            .set_variable("tessedit_pageseg_mode", &request.mode.0.to_string())
            .map_err(|e| ExtractionError::OcrConfig(format!("Failed to set psm: {e:?}")))?;

        tess.set_image_from_mem(image_bytes)
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn recognize_text(
        &self,
        image_bytes: &[u8],
        request: &OcrRequest,
    ) -> Result<String, ExtractionError> {
        let mut tess = self.prepare(image_bytes, request)?;
        tess.get_text()
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))
    }

    fn recognize_tokens(
        &self,
        image_bytes: &[u8],
        request: &OcrRequest,
    ) -> Result<Vec<Token>, ExtractionError> {
        let mut tess = self.prepare(image_bytes, request)?;
        let tsv = tess
            .get_tsv_text(0)
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;
        Ok(parse_tsv_tokens(&tsv))
    }
}

/// Scripted response of the mock engine.
#[derive(Debug, Clone)]
struct MockResponse {
    image: Option<Vec<u8>>,
    mode: Option<PageSegMode>,
    text: String,
    tokens: Vec<Token>,
}

/// Scripted engine for tests: answers by image bytes and/or mode, else a default.
///
/// Responses are matched in insertion order on the image bytes and/or the
/// page segmentation mode; the default response applies otherwise.
pub struct MockOcrEngine {
    default_text: String,
    default_tokens: Vec<Token>,
    responses: Vec<MockResponse>,
    delay: Option<Duration>,
    failing: bool,
    calls: AtomicUsize,
}

impl MockOcrEngine {
    pub fn new(text: &str) -> Self {
        Self {
            default_text: text.to_string(),
            default_tokens: Vec::new(),
            responses: Vec::new(),
            delay: None,
            failing: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Engine whose every call fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new("")
        }
    }

    pub fn with_tokens(mut self, tokens: Vec<Token>) -> Self {
        self.default_tokens = tokens;
        self
    }

    pub fn with_image_response(mut self, image: &[u8], text: &str, tokens: Vec<Token>) -> Self {
        self.responses.push(MockResponse {
            image: Some(image.to_vec()),
            mode: None,
            text: text.to_string(),
            tokens,
        });
        self
    }

    pub fn with_mode_response(mut self, mode: PageSegMode, text: &str, tokens: Vec<Token>) -> Self {
        self.responses.push(MockResponse {
            image: None,
            mode: Some(mode),
            text: text.to_string(),
            tokens,
        });
        self
    }

    /// Sleep on every call, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of recognition calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, image_bytes: &[u8], request: &OcrRequest) -> Result<(&str, &[Token]), ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing {
            return Err(ExtractionError::OcrProcessing("mock failure".into()));
        }
        let scripted = self.responses.iter().find(|r| {
            r.image.as_deref().map_or(true, |img| img == image_bytes)
                && r.mode.map_or(true, |m| m == request.mode)
        });
        Ok(match scripted {
            Some(r) => (r.text.as_str(), r.tokens.as_slice()),
            None => (self.default_text.as_str(), self.default_tokens.as_slice()),
        })
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize_text(
        &self,
        image_bytes: &[u8],
        request: &OcrRequest,
    ) -> Result<String, ExtractionError> {
        self.respond(image_bytes, request).map(|(text, _)| text.to_string())
    }

    fn recognize_tokens(
        &self,
        image_bytes: &[u8],
        request: &OcrRequest,
    ) -> Result<Vec<Token>, ExtractionError> {
        self.respond(image_bytes, request).map(|(_, tokens)| tokens.to_vec())
    }
}

/// Parse Tesseract TSV output into positioned word tokens.
/// Only word rows (level 5) with a usable box and text become tokens;
/// confidence 0–100 is scaled to 0.0–1.0.
/// Table rulings recognized as a lone "|" are dropped.
pub fn parse_tsv_tokens(tsv: &str) -> Vec<Token> {
    // First line is the column header.
    tsv.lines().skip(1).filter_map(parse_tsv_word).collect()
}

fn parse_tsv_word(line: &str) -> Option<Token> {
    let fields: Vec<&str> = line.split('\t').collect();
    let [level, _, _, _, _, _, left, top, width, height, conf, text, ..] = fields.as_slice() else {
        return None;
    };
    if level.parse::<i32>().ok()? != 5 {
        return None;
    }
    let conf: i32 = conf.parse().ok()?;
    let text = text.trim();
    if text.is_empty() || text == "|" {
        return None;
    }
    Some(Token {
        text: text.to_string(),
        // -1 means no confidence
        confidence: conf.max(0) as f32 / 100.0,
        bounding_box: parse_bounding_box(left, top, width, height)?,
    })
}

/// Returns None if any field fails to parse.
fn parse_bounding_box(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    Some(BoundingBox {
        x: left.parse().ok()?,
        y: top.parse().ok()?,
        width: width.parse().ok()?,
        height: height.parse().ok()?,
    })
}
