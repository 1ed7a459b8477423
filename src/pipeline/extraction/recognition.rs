//! Page recognition: rasterize a document once per resolution, then run OCR
//! over every page on a rayon pool sized by the recognizer settings.
//!
//! Results are cached per (content hash, dpi, mode, page limit, depth). A page
//! whose OCR call fails or exceeds its per-call timeout degrades to empty
//! output; only rasterization failures propagate.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, warn};

use super::cache::{OcrCache, OcrCacheKey};
use super::types::{
    Document, OcrEngine, OcrRequest, PageRecognition, PageSegMode, PdfPageRenderer, Token,
};
use super::ExtractionError;
use crate::config;

/// Knobs for one recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionSettings {
    /// Tesseract language string, e.g. `deu+eng`.
    pub languages: String,
    /// Page worker threads per recognition pass.
    pub threads: usize,
    /// Per-call OCR limit; `None` waits indefinitely.
    pub page_timeout: Option<Duration>,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            languages: config::DEFAULT_OCR_LANGUAGES.to_string(),
            threads: config::default_ocr_threads(),
            page_timeout: None,
        }
    }
}

/// Rasterizer + OCR engine + shared cache. Cheap to clone.
#[derive(Clone)]
pub struct PageRecognizer {
    engine: Arc<dyn OcrEngine>,
    renderer: Arc<dyn PdfPageRenderer>,
    cache: Arc<OcrCache>,
    settings: RecognitionSettings,
}

impl PageRecognizer {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        renderer: Arc<dyn PdfPageRenderer>,
        cache: Arc<OcrCache>,
    ) -> Self {
        Self {
            engine,
            renderer,
            cache,
            settings: RecognitionSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RecognitionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &RecognitionSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<OcrCache> {
        &self.cache
    }

    /// Recognize a document at one resolution and mode, text and tokens.
    pub fn recognize_document(
        &self,
        document: &Document,
        dpi: u32,
        mode: PageSegMode,
        max_pages: Option<usize>,
    ) -> Result<Arc<Vec<PageRecognition>>, ExtractionError> {
        let mut results = self.recognize_sweep(document, dpi, &[mode], max_pages)?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Page text only: one engine call per page, tokens left empty.
    ///
    /// A cached pass with tokens at the same settings is reused as is.
    pub fn recognize_text(
        &self,
        document: &Document,
        dpi: u32,
        mode: PageSegMode,
        max_pages: Option<usize>,
    ) -> Result<Arc<Vec<PageRecognition>>, ExtractionError> {
        let full = self.cache_key(document, dpi, mode, max_pages, true);
        if let Some(pages) = self.cache.get(&full) {
            return Ok(pages);
        }
        let key = OcrCacheKey {
            tokens: false,
            ..full
        };
        if let Some(pages) = self.cache.get(&key) {
            return Ok(pages);
        }

        let images = self.rasterize(document, dpi, max_pages)?;
        let pages = Arc::new(self.recognize_images(&images, mode, false));
        self.cache.insert(key, Arc::clone(&pages));
        Ok(pages)
    }

    /// Recognize a document at one resolution for every mode, in `modes` order.
    ///
    /// Pages are rasterized at most once, and only if some mode misses the cache.
    pub fn recognize_sweep(
        &self,
        document: &Document,
        dpi: u32,
        modes: &[PageSegMode],
        max_pages: Option<usize>,
    ) -> Result<Vec<Arc<Vec<PageRecognition>>>, ExtractionError> {
        let keys: Vec<OcrCacheKey> = modes
            .iter()
            .map(|&mode| self.cache_key(document, dpi, mode, max_pages, true))
            .collect();
        let mut results: Vec<Option<Arc<Vec<PageRecognition>>>> =
            keys.iter().map(|key| self.cache.get(key)).collect();

        if results.iter().any(Option::is_none) {
            let images = self.rasterize(document, dpi, max_pages)?;
            for ((slot, key), &mode) in results.iter_mut().zip(keys).zip(modes) {
                if slot.is_some() {
                    continue;
                }
                let pages = Arc::new(self.recognize_images(&images, mode, true));
                self.cache.insert(key, Arc::clone(&pages));
                *slot = Some(pages);
            }
        } else {
            debug!(document = %document.name(), dpi, "OCR cache hit for every mode");
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn cache_key(
        &self,
        document: &Document,
        dpi: u32,
        mode: PageSegMode,
        max_pages: Option<usize>,
        tokens: bool,
    ) -> OcrCacheKey {
        OcrCacheKey {
            content_hash: document.content_hash().to_string(),
            dpi,
            mode,
            max_pages,
            tokens,
        }
    }

    fn rasterize(
        &self,
        document: &Document,
        dpi: u32,
        max_pages: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, ExtractionError> {
        let images = self
            .renderer
            .render_pages(document.bytes(), dpi, max_pages)?;
        debug!(
            document = %document.name(),
            dpi,
            pages = images.len(),
            "Rasterized document"
        );
        Ok(images)
    }

    /// Run OCR over page images, in page order.
    fn recognize_images(
        &self,
        images: &[Vec<u8>],
        mode: PageSegMode,
        tokens: bool,
    ) -> Vec<PageRecognition> {
        if images.is_empty() {
            return Vec::new();
        }

        let request = OcrRequest {
            mode,
            languages: self.settings.languages.clone(),
            timeout: self.settings.page_timeout,
        };
        let recognize = |(index, image): (usize, &Vec<u8>)| {
            self.recognize_page(image, index + 1, &request, tokens)
        };

        let workers = self.settings.threads.clamp(1, images.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ocr-page-{i}"))
            .build();
        match pool {
            Ok(pool) => pool.install(|| images.par_iter().enumerate().map(recognize).collect()),
            Err(e) => {
                warn!(error = %e, "Page worker pool unavailable, recognizing sequentially");
                images.iter().enumerate().map(recognize).collect()
            }
        }
    }

    fn recognize_page(
        &self,
        image: &[u8],
        page_number: usize,
        request: &OcrRequest,
        tokens: bool,
    ) -> PageRecognition {
        match self.call_engine(image, request, tokens) {
            Ok((text, tokens)) => PageRecognition {
                page_number,
                text,
                tokens,
            },
            Err(e) => {
                warn!(
                    page = page_number,
                    mode = %request.mode,
                    error = %e,
                    "Page recognition failed, continuing with empty output"
                );
                PageRecognition::empty(page_number)
            }
        }
    }

    /// Text (and tokens when asked) of one image, bounded by the request
    /// timeout.
    ///
    /// A timed-out call keeps running on its detached thread; its result is
    /// discarded.
    fn call_engine(
        &self,
        image: &[u8],
        request: &OcrRequest,
        tokens: bool,
    ) -> Result<(String, Vec<Token>), ExtractionError> {
        let Some(limit) = request.timeout else {
            return recognize_page_image(self.engine.as_ref(), image, request, tokens);
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let engine = Arc::clone(&self.engine);
        let image = image.to_vec();
        let request = request.clone();
        std::thread::spawn(move || {
            let _ = tx.send(recognize_page_image(engine.as_ref(), &image, &request, tokens));
        });

        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ExtractionError::OcrTimeout(limit)),
            Err(RecvTimeoutError::Disconnected) => Err(ExtractionError::OcrProcessing(
                "OCR worker terminated without a result".into(),
            )),
        }
    }
}

fn recognize_page_image(
    engine: &dyn OcrEngine,
    image: &[u8],
    request: &OcrRequest,
    tokens: bool,
) -> Result<(String, Vec<Token>), ExtractionError> {
    let text = engine.recognize_text(image, request)?;
    let tokens = if tokens {
        engine.recognize_tokens(image, request)?
    } else {
        Vec::new()
    };
    Ok((text, tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::ocr::MockOcrEngine;
    use crate::pipeline::extraction::pdfium::{mock_page_image, MockPdfPageRenderer};

    fn recognizer(engine: Arc<MockOcrEngine>, pages: usize) -> PageRecognizer {
        PageRecognizer::new(
            engine,
            Arc::new(MockPdfPageRenderer::new(pages)),
            Arc::new(OcrCache::new()),
        )
    }

    fn settings(threads: usize, page_timeout: Option<Duration>) -> RecognitionSettings {
        RecognitionSettings {
            languages: "deu+eng".into(),
            threads,
            page_timeout,
        }
    }

    #[test]
    fn pages_come_back_in_page_order() {
        let mut engine = MockOcrEngine::new("");
        for page in 1..=6 {
            engine = engine.with_image_response(
                &mock_page_image(page),
                &format!("page {page}"),
                vec![],
            );
        }
        let recognizer = recognizer(Arc::new(engine), 6).with_settings(settings(4, None));
        let doc = Document::new("t.pdf", b"pdf".to_vec());

        let pages = recognizer
            .recognize_document(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        let texts: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["page 1", "page 2", "page 3", "page 4", "page 5", "page 6"]
        );
        assert_eq!(pages[5].page_number, 6);
    }

    #[test]
    fn second_pass_is_served_from_cache() {
        let engine = Arc::new(MockOcrEngine::new("Statistik 5"));
        let recognizer = recognizer(Arc::clone(&engine), 2);
        let doc = Document::new("t.pdf", b"pdf".to_vec());

        recognizer
            .recognize_document(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        let after_first = engine.calls();
        assert_eq!(after_first, 4, "text and tokens for two pages");

        // Same content under another name hits the same entry.
        let copy = Document::new("copy.pdf", b"pdf".to_vec());
        recognizer
            .recognize_document(&copy, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        assert_eq!(engine.calls(), after_first);
        assert_eq!(recognizer.cache().len(), 1);
    }

    #[test]
    fn page_limit_and_dpi_are_separate_entries() {
        let engine = Arc::new(MockOcrEngine::new("x"));
        let recognizer = recognizer(Arc::clone(&engine), 3);
        let doc = Document::new("t.pdf", b"pdf".to_vec());

        let first = recognizer
            .recognize_document(&doc, 200, PageSegMode::SINGLE_BLOCK, Some(1))
            .unwrap();
        assert_eq!(first.len(), 1);
        let all = recognizer
            .recognize_document(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        assert_eq!(all.len(), 3);
        recognizer
            .recognize_document(&doc, 300, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        assert_eq!(recognizer.cache().len(), 3);
    }

    #[test]
    fn sweep_returns_one_result_per_mode() {
        let engine = MockOcrEngine::new("block")
            .with_mode_response(PageSegMode::SINGLE_COLUMN, "column", vec![]);
        let recognizer = recognizer(Arc::new(engine), 1);
        let doc = Document::new("t.pdf", b"pdf".to_vec());

        let results = recognizer
            .recognize_sweep(
                &doc,
                300,
                &[PageSegMode::SINGLE_COLUMN, PageSegMode::SINGLE_BLOCK],
                None,
            )
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0][0].text, "column");
        assert_eq!(results[1][0].text, "block");
    }

    #[test]
    fn failing_engine_degrades_to_empty_pages() {
        let recognizer = recognizer(Arc::new(MockOcrEngine::failing()), 2);
        let doc = Document::new("t.pdf", b"pdf".to_vec());
        let pages = recognizer
            .recognize_document(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.text.is_empty() && p.tokens.is_empty()));
        assert_eq!(pages[1].page_number, 2);
    }

    #[test]
    fn slow_page_times_out_to_empty_output() {
        let engine = MockOcrEngine::new("too late").with_delay(Duration::from_millis(400));
        let recognizer = recognizer(Arc::new(engine), 1)
            .with_settings(settings(1, Some(Duration::from_millis(20))));
        let doc = Document::new("t.pdf", b"pdf".to_vec());
        let pages = recognizer
            .recognize_document(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].text.is_empty());
    }

    #[test]
    fn timeout_not_hit_returns_text() {
        let recognizer = recognizer(Arc::new(MockOcrEngine::new("Mathematik")), 1)
            .with_settings(settings(2, Some(Duration::from_secs(5))));
        let doc = Document::new("t.pdf", b"pdf".to_vec());
        let pages = recognizer
            .recognize_document(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        assert_eq!(pages[0].text, "Mathematik");
    }

    #[test]
    fn text_only_pass_makes_one_call_per_page() {
        let engine = Arc::new(MockOcrEngine::new("Transcript of Records"));
        let recognizer = recognizer(Arc::clone(&engine), 3);
        let doc = Document::new("t.pdf", b"pdf".to_vec());

        let pages = recognizer
            .recognize_text(&doc, 200, PageSegMode::SINGLE_BLOCK, Some(1))
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "Transcript of Records");
        assert!(pages[0].tokens.is_empty());
        assert_eq!(engine.calls(), 1);

        recognizer
            .recognize_text(&doc, 200, PageSegMode::SINGLE_BLOCK, Some(1))
            .unwrap();
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn text_only_pass_reuses_full_entry() {
        let engine = Arc::new(MockOcrEngine::new("Statistik 5"));
        let recognizer = recognizer(Arc::clone(&engine), 2);
        let doc = Document::new("t.pdf", b"pdf".to_vec());

        recognizer
            .recognize_document(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        let after_full = engine.calls();
        let pages = recognizer
            .recognize_text(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(engine.calls(), after_full);
        assert_eq!(recognizer.cache().len(), 1);
    }

    #[test]
    fn text_only_entry_does_not_serve_token_pass() {
        let engine = Arc::new(MockOcrEngine::new("x"));
        let recognizer = recognizer(Arc::clone(&engine), 1);
        let doc = Document::new("t.pdf", b"pdf".to_vec());

        recognizer
            .recognize_text(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        recognizer
            .recognize_document(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .unwrap();
        assert_eq!(engine.calls(), 3);
        assert_eq!(recognizer.cache().len(), 2);
    }

    #[test]
    fn rasterization_failure_propagates() {
        let recognizer = PageRecognizer::new(
            Arc::new(MockOcrEngine::new("x")),
            Arc::new(MockPdfPageRenderer::failing()),
            Arc::new(OcrCache::new()),
        );
        let doc = Document::new("t.pdf", b"pdf".to_vec());
        assert!(recognizer
            .recognize_document(&doc, 200, PageSegMode::SINGLE_BLOCK, None)
            .is_err());
        assert!(recognizer.cache().is_empty());
    }
}
