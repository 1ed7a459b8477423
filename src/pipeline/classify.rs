//! Heuristic document classification.
//!
//! Only the first page of each document is recognized. Keyword scores for the
//! four document kinds are computed on the lowercased text; the highest score
//! wins (ties in declaration order) and anything below 2 is `Other`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::{DocumentKind, ProgramTrack};
use crate::pipeline::extraction::{Document, PageRecognizer, PageSegMode};

/// Scores below this label the document `Other`.
pub const MIN_CLASSIFICATION_SCORE: u32 = 2;

/// Resolution and mode of the first-page preview.
const PREVIEW_DPI: u32 = 200;
const PREVIEW_MODE: PageSegMode = PageSegMode::SINGLE_BLOCK;

/// More numbered lines than this hint at a table of results.
const MANY_DIGIT_LINES: usize = 20;

// ── Keyword tables ──────────────────────────────────────

const TRANSCRIPT_STRONG: &[&str] = &[
    "transcript of records",
    "transcript of academic record",
    "grade report",
    "leistungsübersicht",
    "notenübersicht",
    "notenspiegel",
    "leistungsnachweis",
    "official transcript",
    "academic transcript",
    "student transcript",
    "unofficial transcript",
    "university transcript",
    "course transcript",
    "academic record",
    "record of study",
    "record of academic work",
    "course history",
    "study history",
    "study record",
    "marksheet",
    "mark sheet",
    "marks sheet",
    "statement of marks",
    "statement of results",
    "grade history",
    "performance report",
    "performance transcript",
];

const CREDIT_KEYWORDS: &[&str] = &["ects", "leistungspunkte", "credits", "credit points", "cp "];

const GERMAN_CERTIFICATES: &[&str] = &[
    "dsh-2",
    "dsh-3",
    "testdaf",
    "goethe-zertifikat c2",
    "zentrale oberstufenpruefung",
    "zentrale oberstufenprüfung",
    "deutsches sprachdiplom",
    "telc deutsch c1 hochschule",
    "österreichisches sprachdiplom",
    "oesd c2",
    "österreichische sprachdiplom c2",
];

const ENGLISH_CERTIFICATES: &[&str] = &[
    "toefl",
    "test of english as a foreign language",
    "ielts",
    "cambridge english",
    "b2 first",
    "first certificate",
    "linguaskill",
    "language test report form",
    "english language test",
];

const DEGREE_KEYWORDS: &[&str] = &[
    "bachelorzeugnis",
    "zeugnis",
    "urkunde",
    "bachelor of science",
    "bachelor of arts",
    "bachelor of engineering",
    "bachelor of",
    "degree certificate",
    "degree",
    "diploma",
    "baccalaureate",
    "this is to certify that",
    "has been awarded the degree",
];

const GRADE_KEYWORDS: &[&str] = &["gesamtnote", "abschlussnote", "overall grade"];

const PRE_CHECK_KEYWORDS: &[&str] = &[
    "vorprüfungsdokumentation",
    "vorpruefungsdokumentation",
    "vpd",
    "uni-assist",
    "uni assist",
];

static SEMESTER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"wise|sose|wintersemester|sommersemester|ws ?20|ss ?20")
        .expect("valid semester regex")
});

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

/// Per-kind keyword scores of one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationScores {
    pub transcript: u32,
    pub language_certificate: u32,
    pub degree_certificate: u32,
    #[serde(rename = "vpd")]
    pub pre_check: u32,
}

impl ClassificationScores {
    /// Highest-scoring kind; earlier kinds win ties, low scores are `Other`.
    pub fn best_kind(&self) -> DocumentKind {
        let ranked = [
            (DocumentKind::Transcript, self.transcript),
            (DocumentKind::LanguageCertificate, self.language_certificate),
            (DocumentKind::DegreeCertificate, self.degree_certificate),
            (DocumentKind::PreCheckDocumentation, self.pre_check),
        ];
        let mut best = ranked[0];
        for candidate in &ranked[1..] {
            if candidate.1 > best.1 {
                best = *candidate;
            }
        }
        if best.1 < MIN_CLASSIFICATION_SCORE {
            DocumentKind::Other
        } else {
            best.0
        }
    }
}

/// Kind of one document with the scores that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: DocumentKind,
    pub scores: ClassificationScores,
}

impl Classification {
    pub fn other() -> Self {
        Self {
            kind: DocumentKind::Other,
            scores: ClassificationScores::default(),
        }
    }
}

pub fn score_transcript(text_low: &str) -> u32 {
    let mut score = 0;
    if contains_any(text_low, TRANSCRIPT_STRONG) {
        score += 4;
    }
    if contains_any(text_low, CREDIT_KEYWORDS) {
        score += 3;
    }
    if SEMESTER_MARKER.find_iter(text_low).count() >= 2 {
        score += 2;
    }
    let digit_lines = text_low
        .lines()
        .filter(|line| line.chars().any(|c| c.is_ascii_digit()))
        .count();
    if digit_lines > MANY_DIGIT_LINES {
        score += 1;
    }
    score
}

pub fn score_language_certificate(text_low: &str, track: ProgramTrack) -> u32 {
    let (certificates, exam_mentions): (&[&str], &[&str]) = match track {
        ProgramTrack::Bwl => (GERMAN_CERTIFICATES, &["sprachprüfung", "language exam"]),
        ProgramTrack::Ai => (ENGLISH_CERTIFICATES, &["overall band", "overall score"]),
    };
    let mut score = 0;
    if contains_any(text_low, certificates) {
        score += 5;
    }
    if contains_any(text_low, exam_mentions) {
        score += 2;
    }
    score
}

pub fn score_degree_certificate(text_low: &str) -> u32 {
    let mut score = 0;
    if contains_any(text_low, DEGREE_KEYWORDS) {
        score += 4;
    }
    if contains_any(text_low, GRADE_KEYWORDS) {
        score += 2;
    }
    if !contains_any(text_low, &["transcript", "ects", "credits"]) {
        score += 1;
    }
    score
}

pub fn score_pre_check(text_low: &str) -> u32 {
    let mut score = 0;
    if contains_any(text_low, PRE_CHECK_KEYWORDS) {
        score += 6;
    }
    if text_low.contains("bewertung") && text_low.contains("ausländischer hochschulabschluss") {
        score += 2;
    }
    score
}

/// Classify recognized first-page text.
pub fn classify_text(text: &str, track: ProgramTrack) -> Classification {
    if text.trim().is_empty() {
        return Classification::other();
    }
    let text_low = text.to_lowercase();
    let scores = ClassificationScores {
        transcript: score_transcript(&text_low),
        language_certificate: score_language_certificate(&text_low, track),
        degree_certificate: score_degree_certificate(&text_low),
        pre_check: score_pre_check(&text_low),
    };
    Classification {
        kind: scores.best_kind(),
        scores,
    }
}

/// Documents grouped by kind, plus the strongest transcript.
#[derive(Debug, Clone, Default)]
pub struct ClassificationReport {
    pub by_type: BTreeMap<DocumentKind, Vec<Document>>,
    pub best_transcript: Option<(Document, ClassificationScores)>,
}

impl ClassificationReport {
    pub fn documents(&self, kind: DocumentKind) -> &[Document] {
        self.by_type.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Labels documents from a first-page OCR preview.
#[derive(Clone)]
pub struct DocumentClassifier {
    recognizer: PageRecognizer,
}

impl DocumentClassifier {
    pub fn new(recognizer: PageRecognizer) -> Self {
        Self { recognizer }
    }

    pub fn classify_document(&self, document: &Document, track: ProgramTrack) -> Classification {
        if document.is_empty() {
            tracing::warn!(document = %document.name(), "Empty document classified as other");
            return Classification::other();
        }
        let preview =
            self.recognizer
                .recognize_text(document, PREVIEW_DPI, PREVIEW_MODE, Some(1));
        let pages = match preview {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!(
                    document = %document.name(),
                    error = %e,
                    "Preview recognition failed, classifying as other"
                );
                return Classification::other();
            }
        };
        let text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let classification = classify_text(&text, track);
        tracing::info!(
            document = %document.name(),
            kind = %classification.kind,
            transcript = classification.scores.transcript,
            language_certificate = classification.scores.language_certificate,
            degree_certificate = classification.scores.degree_certificate,
            vpd = classification.scores.pre_check,
            "Document classified"
        );
        classification
    }

    /// Classify each document independently and group them by kind.
    pub fn classify_many(&self, documents: &[Document], track: ProgramTrack) -> ClassificationReport {
        let mut report = ClassificationReport::default();
        for document in documents {
            let classification = self.classify_document(document, track);
            report
                .by_type
                .entry(classification.kind)
                .or_default()
                .push(document.clone());

            if classification.kind == DocumentKind::Transcript {
                let better = report
                    .best_transcript
                    .as_ref()
                    .map_or(true, |(_, best)| classification.scores.transcript > best.transcript);
                if better {
                    report.best_transcript = Some((document.clone(), classification.scores));
                }
            }
        }
        report
    }
}
