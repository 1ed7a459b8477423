pub mod types;
pub mod normalize;
pub mod cache;
pub mod ocr;
pub mod pdfium;
pub mod recognition;
pub mod rows;
pub mod column_detect;
pub mod orchestrator;

pub use types::*;
pub use normalize::*;
pub use cache::*;
pub use ocr::*;
pub use recognition::*;
pub use orchestrator::*;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("Tesseract OCR configuration error: {0}")]
    OcrConfig(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("OCR call exceeded {0:?}")]
    OcrTimeout(Duration),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDF is password protected")]
    PdfEncrypted,

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Tessdata not found at: {0}")]
    TessdataNotFound(PathBuf),

    #[error("OCR support not compiled in (enable the `ocr` feature)")]
    OcrUnavailable,
}
