//! Applicant evaluation: classify every submitted document, extract credits
//! from the strongest transcript (else the largest document that is not a
//! pre-check documentation), read the overall grade, check the language
//! proof and judge the result against the program requirements.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{CreditRequirement, ProgramConfig};
use crate::models::{DocumentKind, ExtractionMethod, GradeCheckReason, ProgramTrack};
use crate::pipeline::classify::DocumentClassifier;
use crate::pipeline::extraction::{
    extract_ects_with_timeout, CreditExtraction, CreditExtractor, Document, PageSegMode,
};
use crate::pipeline::grading::{
    extract_overall_grade, verify_grade, GradeVerification, DEFAULT_GRADE_TOLERANCE,
};
use crate::pipeline::language::{evaluate_language_status, LanguageStatus};
use crate::pipeline::matching::ModuleMapping;
use crate::pipeline::requirements::{
    evaluate_requirements, resolve_grade, RequirementEvaluation, ResolvedGrade,
};

const FULL_TEXT_DPI: u32 = 200;
const FULL_TEXT_MODE: PageSegMode = PageSegMode::SINGLE_BLOCK;

/// Everything one applicant submitted.
#[derive(Debug, Clone, Default)]
pub struct Applicant {
    pub documents: Vec<Document>,
    /// Country of the bachelor degree as entered by the applicant.
    pub bachelor_country: Option<String>,
    /// German grade claimed by the applicant.
    pub claimed_grade: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicantReport {
    /// Document names per detected kind.
    pub documents: BTreeMap<DocumentKind, Vec<String>>,
    pub best_transcript: Option<String>,
    /// Document the credits were extracted from.
    pub credit_source: Option<String>,
    pub extraction: CreditExtraction,
    pub grade: ResolvedGrade,
    pub grade_check: Option<GradeVerification>,
    pub language: LanguageStatus,
    pub evaluation: RequirementEvaluation,
    /// Observations that do not decide the verdict.
    pub notes: Vec<String>,
}

impl ApplicantReport {
    pub fn status(&self) -> &'static str {
        self.evaluation.status()
    }
}

/// Blocking part of an evaluation: classification and plain-text reads.
#[derive(Debug, Default)]
struct Screening {
    documents: BTreeMap<DocumentKind, Vec<String>>,
    best_transcript: Option<Document>,
    /// Largest document that is not a pre-check documentation.
    largest_candidate: Option<Document>,
    has_pre_check: bool,
    recognized_grade: Option<f64>,
    language_texts: Vec<String>,
}

/// Evaluates applicants against one program configuration.
#[derive(Clone)]
pub struct ApplicantEvaluator {
    classifier: DocumentClassifier,
    extractor: Arc<CreditExtractor>,
    track: ProgramTrack,
    max_grade: f64,
    requirements: Arc<Vec<CreditRequirement>>,
    mapping: Arc<ModuleMapping>,
    categories: Arc<Vec<String>>,
    document_timeout: Duration,
}

impl ApplicantEvaluator {
    pub fn new(extractor: Arc<CreditExtractor>, config: &ProgramConfig) -> Self {
        Self {
            classifier: DocumentClassifier::new(extractor.recognizer().clone()),
            extractor,
            track: config.track,
            max_grade: config.max_grade,
            requirements: Arc::new(config.requirements.clone()),
            mapping: Arc::new(config.module_mapping()),
            categories: Arc::new(config.categories()),
            document_timeout: config.ocr.document_timeout(),
        }
    }

    pub async fn evaluate(&self, applicant: Applicant) -> ApplicantReport {
        let screener = self.clone();
        let documents = applicant.documents.clone();
        let task = tokio::task::spawn_blocking(move || screener.screen(&documents));
        let screening = match task.await {
            Ok(screening) => screening,
            Err(e) => {
                tracing::error!(error = %e, "Document screening task failed");
                Screening::default()
            }
        };

        let mut notes = Vec::new();
        let country = applicant.bachelor_country.as_deref();

        // Grades read from a pre-check documentation are already German; grades
        // read from the degree certificate are converted when possible.
        let grade_check = match (screening.has_pre_check, country, screening.recognized_grade) {
            (false, Some(country), Some(foreign)) if applicant.claimed_grade.is_some() => Some(
                verify_grade(country, foreign, applicant.claimed_grade, DEFAULT_GRADE_TOLERANCE),
            ),
            _ => None,
        };
        if let Some(check) = &grade_check {
            if check.reason == GradeCheckReason::BavarianMismatch {
                notes.push(GradeCheckReason::BavarianMismatch.to_string());
            }
        }
        let converted = grade_check.and_then(|check| check.converted);
        if let (Some(converted), Some(country), Some(foreign)) =
            (converted, country, screening.recognized_grade)
        {
            notes.push(format!(
                "Grade converted from {country} scale (recognized: {foreign:?}, German: {converted:?})"
            ));
        }
        let verdict_grade = converted.or(screening.recognized_grade);

        let grade = resolve_grade(verdict_grade, applicant.claimed_grade);
        if grade.mismatch {
            if let (Some(recognized), Some(claimed)) = (grade.value, applicant.claimed_grade) {
                notes.push(format!(
                    "Grade mismatch between claimed and recognized (claimed: {claimed:?}, OCR: {recognized:?})"
                ));
            }
        }

        let language = evaluate_language_status(self.track, &screening.language_texts, country);
        notes.push(format!("Language certificate status: {language}"));

        let credit_source = match (&screening.best_transcript, &screening.largest_candidate) {
            (Some(transcript), _) => Some(transcript),
            (None, Some(largest)) => {
                tracing::info!(
                    document = %largest.name(),
                    "No transcript detected, extracting credits from largest document"
                );
                notes.push(
                    "No clear transcript detected, largest document used for credits".to_string(),
                );
                Some(largest)
            }
            (None, None) => None,
        };
        let extraction = match credit_source {
            Some(document) => {
                extract_ects_with_timeout(
                    Arc::clone(&self.extractor),
                    document.clone(),
                    Arc::clone(&self.mapping),
                    Arc::clone(&self.categories),
                    self.document_timeout,
                )
                .await
            }
            None => {
                notes.push("No transcript found".to_string());
                CreditExtraction::empty(&self.categories, ExtractionMethod::Skipped)
            }
        };
        let credit_source = credit_source.map(|d| d.name().to_string());

        let evaluation = evaluate_requirements(
            &extraction.sums,
            &extraction.unrecognized,
            &self.requirements,
            grade.value,
            self.max_grade,
        );

        tracing::info!(
            documents = applicant.documents.len(),
            status = evaluation.status(),
            method = %extraction.method,
            total = extraction.total(),
            grade = ?grade.value,
            grade_source = grade.source.as_str(),
            "Applicant evaluated"
        );

        ApplicantReport {
            documents: screening.documents,
            best_transcript: screening.best_transcript.map(|d| d.name().to_string()),
            credit_source,
            extraction,
            grade,
            grade_check,
            language,
            evaluation,
            notes,
        }
    }

    fn screen(&self, documents: &[Document]) -> Screening {
        let report = self.classifier.classify_many(documents, self.track);

        let pre_check = report.documents(DocumentKind::PreCheckDocumentation);
        let has_pre_check = !pre_check.is_empty();
        let recognized_grade = match pre_check.first() {
            Some(vpd) => extract_overall_grade(&self.document_text(vpd)),
            None => self.grade_from_certificates(
                report.documents(DocumentKind::DegreeCertificate),
                documents,
            ),
        };

        let largest_candidate = documents
            .iter()
            .filter(|doc| !doc.is_empty())
            .filter(|doc| !pre_check.iter().any(|vpd| vpd.content_hash() == doc.content_hash()))
            .max_by_key(|doc| doc.len())
            .cloned();

        let language_texts = report
            .documents(DocumentKind::LanguageCertificate)
            .iter()
            .map(|doc| self.document_text(doc))
            .collect();

        Screening {
            documents: report
                .by_type
                .iter()
                .map(|(kind, docs)| (*kind, docs.iter().map(|d| d.name().to_string()).collect()))
                .collect(),
            best_transcript: report.best_transcript.map(|(doc, _)| doc),
            largest_candidate,
            has_pre_check,
            recognized_grade,
            language_texts,
        }
    }

    /// Overall grade from the degree certificates, falling back to the largest
    /// submitted document.
    fn grade_from_certificates(&self, certificates: &[Document], all: &[Document]) -> Option<f64> {
        let combined = certificates
            .iter()
            .map(|doc| self.document_text(doc))
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(grade) = extract_overall_grade(&combined) {
            return Some(grade);
        }
        let largest = all.iter().max_by_key(|doc| doc.len())?;
        tracing::debug!(document = %largest.name(), "Reading overall grade from largest document");
        extract_overall_grade(&self.document_text(largest))
    }

    fn document_text(&self, document: &Document) -> String {
        let recognized = self.extractor.recognizer().recognize_text(
            document,
            FULL_TEXT_DPI,
            FULL_TEXT_MODE,
            None,
        );
        match recognized {
            Ok(pages) => pages
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                tracing::warn!(document = %document.name(), error = %e, "Text recognition failed");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::cache::OcrCache;
    use crate::pipeline::extraction::ocr::MockOcrEngine;
    use crate::pipeline::extraction::types::PdfPageRenderer;
    use crate::pipeline::extraction::{ExtractionError, PageRecognizer};

    /// Renders each single-page document as its own bytes.
    struct EchoRenderer;

    impl PdfPageRenderer for EchoRenderer {
        fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
            Ok(1)
        }

        fn render_page(
            &self,
            pdf_bytes: &[u8],
            _page_number: usize,
            _dpi: u32,
        ) -> Result<Vec<u8>, ExtractionError> {
            Ok(pdf_bytes.to_vec())
        }
    }

    const CONFIG: &str = r#"
track = "bwl"
max_grade = 2.4

[[requirements]]
category = "Statistik"
min_credits = 5.0

[modules]
"statistik" = "Statistik"
"#;

    const TRANSCRIPT: &str =
        "Transcript of Records\nWintersemester 2019\nSommersemester 2020\nStatistik 5 ECTS";
    const DEGREE: &str = "Bachelorzeugnis\nBachelor of Science\nGesamtnote 1,7";
    const GERMAN_CERT: &str = "TestDaF-Zeugnis\nSprachprüfung bestanden";
    const PRE_CHECK: &str =
        "uni-assist Vorprüfungsdokumentation\nBewertung ausländischer Hochschulabschluss\nGesamtnote 2,3";

    fn evaluator(engine: MockOcrEngine, config: &str) -> ApplicantEvaluator {
        let config = ProgramConfig::from_toml_str(config).unwrap();
        let recognizer =
            PageRecognizer::new(Arc::new(engine), Arc::new(EchoRenderer), Arc::new(OcrCache::new()));
        ApplicantEvaluator::new(Arc::new(CreditExtractor::new(recognizer)), &config)
    }

    fn engine() -> MockOcrEngine {
        MockOcrEngine::new("")
            .with_image_response(b"transcript", TRANSCRIPT, Vec::new())
            .with_image_response(b"degree", DEGREE, Vec::new())
            .with_image_response(b"german", GERMAN_CERT, Vec::new())
            .with_image_response(b"precheck", PRE_CHECK, Vec::new())
            .with_image_response(b"us-degree", "Bachelor of Science\nFinal grade: 3.3", Vec::new())
            .with_image_response(b"unlabeled-module-list", "Statistik 5 LP", Vec::new())
    }

    fn doc(name: &str, bytes: &[u8]) -> Document {
        Document::new(name, bytes.to_vec())
    }

    #[tokio::test]
    async fn complete_application_is_fulfilled() {
        let applicant = Applicant {
            documents: vec![
                doc("tor.pdf", b"transcript"),
                doc("zeugnis.pdf", b"degree"),
                doc("testdaf.pdf", b"german"),
            ],
            bachelor_country: Some("Italien".into()),
            claimed_grade: None,
        };
        let report = evaluator(engine(), CONFIG).evaluate(applicant).await;

        assert_eq!(report.best_transcript.as_deref(), Some("tor.pdf"));
        assert_eq!(report.extraction.method, ExtractionMethod::OcrLine);
        assert_eq!(report.extraction.sums.get("Statistik"), Some(5.0));
        assert_eq!(report.grade.value, Some(1.7));
        assert_eq!(report.language, LanguageStatus::GermanAdvanced);
        assert_eq!(
            report.documents.get(&DocumentKind::DegreeCertificate),
            Some(&vec!["zeugnis.pdf".to_string()])
        );
        assert!(report.evaluation.fulfilled, "{:?}", report.evaluation.reasons);
        assert_eq!(report.status(), "Fulfilled");
    }

    #[tokio::test]
    async fn pre_check_grade_wins_and_mismatch_is_noted() {
        let applicant = Applicant {
            documents: vec![doc("tor.pdf", b"transcript"), doc("vpd.pdf", b"precheck")],
            bachelor_country: Some("Spain".into()),
            claimed_grade: Some(2.0),
        };
        let report = evaluator(engine(), CONFIG).evaluate(applicant).await;

        assert_eq!(report.grade.value, Some(2.3));
        assert!(report.grade.mismatch);
        assert!(report.grade_check.is_none());
        assert!(report.notes.iter().any(|n| n.starts_with("Grade mismatch")));
        assert!(report.evaluation.fulfilled);
    }

    #[tokio::test]
    async fn foreign_grade_is_converted_and_checked() {
        let applicant = Applicant {
            documents: vec![doc("tor.pdf", b"transcript"), doc("diploma.pdf", b"us-degree")],
            bachelor_country: Some("USA".into()),
            claimed_grade: Some(1.5),
        };
        let report = evaluator(engine(), CONFIG).evaluate(applicant).await;

        let check = report.grade_check.expect("grade check");
        assert_eq!(check.reason, GradeCheckReason::BavarianMismatch);
        assert_eq!(check.converted, Some(2.05));
        assert_eq!(report.grade.value, Some(2.05));
        assert!(report.notes.iter().any(|n| n == "BavarianMismatch"));
        assert!(report
            .notes
            .iter()
            .any(|n| n == "Grade converted from USA scale (recognized: 3.3, German: 2.05)"));
        assert!(report.evaluation.grade_ok);
    }

    #[tokio::test]
    async fn credits_fall_back_to_largest_document() {
        let applicant = Applicant {
            documents: vec![
                doc("zeugnis.pdf", b"degree"),
                doc("module-list.pdf", b"unlabeled-module-list"),
            ],
            bachelor_country: Some("Germany".into()),
            claimed_grade: Some(1.7),
        };
        let report = evaluator(engine(), CONFIG).evaluate(applicant).await;

        assert_eq!(report.best_transcript, None);
        assert_eq!(report.credit_source.as_deref(), Some("module-list.pdf"));
        assert_eq!(report.extraction.method, ExtractionMethod::OcrLine);
        assert_eq!(report.extraction.sums.get("Statistik"), Some(5.0));
        assert_eq!(report.language, LanguageStatus::NotNecessary);
        assert!(report.evaluation.fulfilled, "{:?}", report.evaluation.reasons);
        assert!(report
            .notes
            .iter()
            .any(|n| n == "No clear transcript detected, largest document used for credits"));
    }

    #[tokio::test]
    async fn largest_document_without_credits_fails_credit_check() {
        let applicant = Applicant {
            documents: vec![doc("zeugnis.pdf", b"degree")],
            bachelor_country: Some("Germany".into()),
            claimed_grade: Some(1.7),
        };
        let report = evaluator(engine(), CONFIG).evaluate(applicant).await;

        assert_eq!(report.credit_source.as_deref(), Some("zeugnis.pdf"));
        assert_eq!(report.extraction.sums.get("Statistik"), Some(0.0));
        assert!(!report.evaluation.credits_fulfilled);
        assert_eq!(report.status(), "Not fulfilled");
    }

    #[tokio::test]
    async fn pre_check_alone_skips_credit_extraction() {
        let applicant = Applicant {
            documents: vec![doc("vpd.pdf", b"precheck"), doc("empty.pdf", b"")],
            bachelor_country: Some("Germany".into()),
            claimed_grade: None,
        };
        let report = evaluator(engine(), CONFIG).evaluate(applicant).await;

        assert_eq!(report.credit_source, None);
        assert_eq!(report.extraction.method, ExtractionMethod::Skipped);
        assert_eq!(report.grade.value, Some(2.3));
        assert!(!report.evaluation.credits_fulfilled);
        assert!(report.notes.iter().any(|n| n == "No transcript found"));
    }

    #[tokio::test]
    async fn grade_falls_back_to_largest_document() {
        let applicant = Applicant {
            documents: vec![doc("tor.pdf", b"transcript"), doc("scan.pdf", b"unlabeled-scan")],
            bachelor_country: None,
            claimed_grade: None,
        };
        let engine = engine().with_image_response(
            b"unlabeled-scan",
            "Final result 2,0",
            Vec::new(),
        );
        let report = evaluator(engine, CONFIG).evaluate(applicant).await;
        assert_eq!(report.grade.value, Some(2.0));
        assert_eq!(report.language, LanguageStatus::RequiredMissing);
    }
}
