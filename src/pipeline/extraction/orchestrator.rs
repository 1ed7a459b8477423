use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::OwnedSemaphorePermit;

use super::column_detect::{credit_value_in_row, detect_credit_column, inline_credit_value};
use super::normalize::is_noise_line;
use super::recognition::PageRecognizer;
use super::rows::group_rows;
use super::types::{Document, PageRecognition, PageSegMode};
use crate::config;
use crate::models::ExtractionMethod;
use crate::pipeline::matching::{match_modules_in_row, CategorySums, CreditTally, ModuleMapping};

/// Resolutions × page segmentation modes tried per document.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub dpis: Vec<u32>,
    pub modes: Vec<PageSegMode>,
}

impl Default for SweepPlan {
    fn default() -> Self {
        Self {
            dpis: config::DEFAULT_SWEEP_DPIS.to_vec(),
            modes: vec![PageSegMode::SINGLE_COLUMN, PageSegMode::SINGLE_BLOCK],
        }
    }
}

/// Credit totals of one document with the evidence behind them.
#[derive(Debug, Clone, Serialize)]
pub struct CreditExtraction {
    pub sums: CategorySums,
    /// `"<name> -> <category>:<value> | <source>"` per counted match.
    pub matched: Vec<String>,
    /// Lines naming a module whose credits could not be read.
    pub unrecognized: Vec<String>,
    pub method: ExtractionMethod,
}

impl CreditExtraction {
    pub fn empty(categories: &[String], method: ExtractionMethod) -> Self {
        Self {
            sums: CategorySums::new(categories),
            matched: Vec::new(),
            unrecognized: Vec::new(),
            method,
        }
    }

    pub fn total(&self) -> f64 {
        self.sums.total()
    }

    fn from_tally(tally: CreditTally, method: ExtractionMethod) -> Self {
        let (sums, matches, unrecognized) = tally.into_parts();
        Self {
            sums,
            matched: matches.iter().map(|m| m.evidence()).collect(),
            unrecognized,
            method,
        }
    }
}

/// Hybrid credit extractor over scanned transcripts.
///
/// Every sweep combination runs two strategies on the recognized pages: a
/// line strategy over plain text lines and a column strategy over token rows
/// of pages with a detected credit column. The column result is preferred
/// whenever it matched anything; across combinations the strictly highest
/// total wins.
pub struct CreditExtractor {
    recognizer: PageRecognizer,
    sweep: SweepPlan,
}

impl CreditExtractor {
    pub fn new(recognizer: PageRecognizer) -> Self {
        Self {
            recognizer,
            sweep: SweepPlan::default(),
        }
    }

    pub fn with_sweep(mut self, sweep: SweepPlan) -> Self {
        self.sweep = sweep;
        self
    }

    pub fn recognizer(&self) -> &PageRecognizer {
        &self.recognizer
    }

    pub fn sweep(&self) -> &SweepPlan {
        &self.sweep
    }

    /// Sum credits per requested category for one document.
    pub fn extract_ects(
        &self,
        document: &Document,
        mapping: &ModuleMapping,
        categories: &[String],
    ) -> CreditExtraction {
        if mapping.is_empty() {
            tracing::info!(document = %document.name(), "Empty module mapping, skipping OCR");
            return CreditExtraction::empty(categories, ExtractionMethod::Skipped);
        }
        if document.is_empty() {
            tracing::warn!(document = %document.name(), "Document missing or empty, skipping OCR");
            return CreditExtraction::empty(categories, ExtractionMethod::Skipped);
        }

        tracing::info!(
            document = %document.name(),
            modules = mapping.len(),
            categories = categories.len(),
            "Starting credit extraction"
        );

        let mut best: Option<CreditExtraction> = None;
        let mut rasterized = false;

        for &dpi in &self.sweep.dpis {
            let recognized = self
                .recognizer
                .recognize_sweep(document, dpi, &self.sweep.modes, None);
            let results = match recognized {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(
                        document = %document.name(),
                        dpi,
                        error = %e,
                        "Rasterization failed, skipping resolution"
                    );
                    continue;
                }
            };
            rasterized = true;

            for (pages, mode) in results.iter().zip(&self.sweep.modes) {
                let candidate = evaluate_pages(pages, mapping, categories);
                tracing::debug!(
                    document = %document.name(),
                    dpi,
                    mode = %mode,
                    method = %candidate.method,
                    total = candidate.total(),
                    "Sweep combination evaluated"
                );
                if best.as_ref().map_or(true, |b| candidate.total() > b.total()) {
                    best = Some(candidate);
                }
            }
        }

        let Some(mut result) = best else {
            let method = if rasterized {
                ExtractionMethod::OcrLine
            } else {
                tracing::warn!(document = %document.name(), "No resolution could be rasterized");
                ExtractionMethod::RasterizeFailed
            };
            return CreditExtraction::empty(categories, method);
        };

        result.sums = result.sums.rounded();
        tracing::info!(
            document = %document.name(),
            method = %result.method,
            total = result.total(),
            matches = result.matched.len(),
            unrecognized = result.unrecognized.len(),
            "Credit extraction complete"
        );
        result
    }
}

/// Run both strategies over one combination's pages and pick one.
fn evaluate_pages(
    pages: &[PageRecognition],
    mapping: &ModuleMapping,
    categories: &[String],
) -> CreditExtraction {
    let mut line = CreditTally::new(categories);
    let mut column = CreditTally::new(categories);

    for page in pages {
        for text in page.lines() {
            if is_noise_line(text) {
                continue;
            }
            let hits: Vec<_> = match_modules_in_row(text, mapping, true)
                .into_iter()
                .filter(|m| line.accepts(m))
                .collect();
            if hits.is_empty() {
                continue;
            }
            let inline = inline_credit_value(text);
            for module in hits {
                match module.credits.or(inline) {
                    Some(credits) => {
                        line.record(module, credits, text);
                    }
                    None => line.note_unrecognized(text),
                }
            }
        }

        let rows = group_rows(&page.tokens);
        let Some(column_x) = detect_credit_column(&rows) else {
            continue;
        };
        for row in &rows {
            let hits: Vec<_> = match_modules_in_row(&row.text, mapping, true)
                .into_iter()
                .filter(|m| column.accepts(m))
                .collect();
            if hits.is_empty() {
                continue;
            }
            let Some(credits) = credit_value_in_row(row, column_x) else {
                column.note_unrecognized(&row.text);
                continue;
            };
            for module in hits {
                column.record(module, credits, &row.text);
            }
        }
    }

    if column.has_matches() {
        CreditExtraction::from_tally(column, ExtractionMethod::OcrColumn)
    } else {
        CreditExtraction::from_tally(line, ExtractionMethod::OcrLine)
    }
}

/// Run [`CreditExtractor::extract_ects`] on the blocking pool under a
/// whole-document timeout.
///
/// A timed-out extraction keeps running in the background until its OCR calls
/// return; its result is discarded but its pages still land in the cache.
pub async fn extract_ects_with_timeout(
    extractor: Arc<CreditExtractor>,
    document: Document,
    mapping: Arc<ModuleMapping>,
    categories: Arc<Vec<String>>,
    limit: Duration,
) -> CreditExtraction {
    run_with_timeout(extractor, document, mapping, categories, limit, None).await
}

/// [`extract_ects_with_timeout`] holding a concurrency slot.
///
/// The permit moves into the blocking task and is released when the OCR work
/// ends, even if the caller already received `FAILED_TIMEOUT`.
pub async fn extract_ects_with_permit(
    extractor: Arc<CreditExtractor>,
    document: Document,
    mapping: Arc<ModuleMapping>,
    categories: Arc<Vec<String>>,
    limit: Duration,
    permit: OwnedSemaphorePermit,
) -> CreditExtraction {
    run_with_timeout(extractor, document, mapping, categories, limit, Some(permit)).await
}

async fn run_with_timeout(
    extractor: Arc<CreditExtractor>,
    document: Document,
    mapping: Arc<ModuleMapping>,
    categories: Arc<Vec<String>>,
    limit: Duration,
    permit: Option<OwnedSemaphorePermit>,
) -> CreditExtraction {
    let name = document.name().to_string();
    let task_categories = Arc::clone(&categories);
    let task = tokio::task::spawn_blocking(move || {
        let result = extractor.extract_ects(&document, &mapping, &task_categories);
        drop(permit);
        result
    });

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            tracing::error!(
                document = %name,
                error = %join_error,
                "Credit extraction task failed"
            );
            CreditExtraction::empty(&categories, ExtractionMethod::FailedError)
        }
        Err(_) => {
            tracing::warn!(
                document = %name,
                timeout_secs = limit.as_secs_f64(),
                "Credit extraction timed out"
            );
            CreditExtraction::empty(&categories, ExtractionMethod::FailedTimeout)
        }
    }
}
