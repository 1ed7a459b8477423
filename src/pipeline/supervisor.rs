//! Bounded concurrent credit extraction over many documents.
//!
//! At most `max_concurrent` documents are extracted at once. Each extraction
//! runs on the blocking pool under its own timeout, so one stuck document
//! never holds up its siblings' results. A timed-out document keeps its slot
//! until its OCR work actually ends. Outcomes are sent as they complete.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};

use crate::config;
use crate::pipeline::extraction::{
    extract_ects_with_permit, CreditExtraction, CreditExtractor, Document,
};
use crate::pipeline::matching::ModuleMapping;

/// One document to extract, with the mapping and categories it is judged by.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub document: Document,
    pub mapping: Arc<ModuleMapping>,
    pub categories: Arc<Vec<String>>,
}

/// Result of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub document: String,
    pub extraction: CreditExtraction,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Drives document extractions with bounded concurrency.
#[derive(Clone)]
pub struct DocumentSupervisor {
    extractor: Arc<CreditExtractor>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    document_timeout: Duration,
}

impl DocumentSupervisor {
    pub fn new(extractor: Arc<CreditExtractor>) -> Self {
        Self::with_limits(
            extractor,
            config::DEFAULT_MAX_CONCURRENT_DOCUMENTS,
            Duration::from_secs(config::DEFAULT_DOCUMENT_TIMEOUT_SECS),
        )
    }

    pub fn with_limits(
        extractor: Arc<CreditExtractor>,
        max_concurrent: usize,
        document_timeout: Duration,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            extractor,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            document_timeout,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Start every job and return a receiver yielding outcomes in completion
    /// order. The channel closes after the last outcome.
    pub fn run(&self, jobs: Vec<ExtractionJob>) -> mpsc::Receiver<JobOutcome> {
        let (tx, rx) = mpsc::channel(jobs.len().max(1));

        tracing::info!(
            jobs = jobs.len(),
            max_concurrent = self.max_concurrent,
            timeout_secs = self.document_timeout.as_secs_f64(),
            "Starting document extraction batch"
        );

        for job in jobs {
            let tx = tx.clone();
            let extractor = Arc::clone(&self.extractor);
            let permits = Arc::clone(&self.permits);
            let limit = self.document_timeout;

            tokio::spawn(async move {
                // The semaphore is never closed.
                let Ok(permit) = permits.acquire_owned().await else {
                    return;
                };
                let started = Instant::now();
                let name = job.document.name().to_string();
                let extraction = extract_ects_with_permit(
                    extractor,
                    job.document,
                    job.mapping,
                    job.categories,
                    limit,
                    permit,
                )
                .await;
                let outcome = JobOutcome {
                    document: name,
                    extraction,
                    elapsed: started.elapsed(),
                };
                tracing::debug!(
                    document = %outcome.document,
                    method = %outcome.extraction.method,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Document extraction finished"
                );
                if tx.send(outcome).await.is_err() {
                    tracing::debug!("Outcome receiver dropped");
                }
            });
        }

        rx
    }

    /// Run every job and collect all outcomes.
    pub async fn run_all(&self, jobs: Vec<ExtractionJob>) -> Vec<JobOutcome> {
        let expected = jobs.len();
        let mut rx = self.run(jobs);
        let mut outcomes = Vec::with_capacity(expected);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        let failures = outcomes
            .iter()
            .filter(|o| o.extraction.method.is_failure())
            .count();
        tracing::info!(
            completed = outcomes.len(),
            failures,
            "Document extraction batch finished"
        );
        outcomes
    }
}
