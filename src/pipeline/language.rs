//! Language certificate status per program track.
//!
//! `bwl` is German-taught: applicants with a German bachelor need no proof,
//! everyone else needs a German certificate. `ai` is English-taught and every
//! applicant needs English proof. Only a status is reported, never a verdict.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::ProgramTrack;
use crate::pipeline::grading::normalize_country_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageStatus {
    NotNecessary,
    RequiredMissing,
    GermanAdvanced,
    GermanUnclassified,
    ToeflSufficient,
    ToeflUnclear,
    IeltsSufficient,
    IeltsUnclear,
    CambridgeB2Plus,
    CambridgeUnclassified,
    AbiturEnglish,
    EnglishMedium,
    MediumUnclassified,
    EnglishUnclassified,
}

impl LanguageStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotNecessary => "not necessary",
            Self::RequiredMissing => "required but not available",
            Self::GermanAdvanced => "available (German C1/C2 or equivalent)",
            Self::GermanUnclassified => "available (unclassified German certificate)",
            Self::ToeflSufficient => "available (likely sufficient TOEFL)",
            Self::ToeflUnclear => "available (TOEFL but unclear score)",
            Self::IeltsSufficient => "available (likely sufficient IELTS)",
            Self::IeltsUnclear => "available (IELTS but unclear score)",
            Self::CambridgeB2Plus => "available (Cambridge/Linguaskill B2+)",
            Self::CambridgeUnclassified => "available (Cambridge/Linguaskill unclassified)",
            Self::AbiturEnglish => "available (German Abitur with English)",
            Self::EnglishMedium => "available (degree taught in English)",
            Self::MediumUnclassified => "available (medium of instruction unclassified)",
            Self::EnglishUnclassified => "available (unclassified English certificate)",
        }
    }

    /// Whether some certificate was submitted or none is needed.
    pub fn is_satisfied(&self) -> bool {
        !matches!(self, Self::RequiredMissing)
    }
}

impl std::fmt::Display for LanguageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Patterns ─────────────────────────────────────────────

/// German certificates at C1/C2 level or accepted equivalents.
static GERMAN_ADVANCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        dsh[-\s]?[23]
        | testdaf
        | goethe[-\s]?zertifikat\s*c2
        | (?:kleine|große)s?\s+deutsches?\s+sprachdiplom
        | zentrale\s+oberstufenpr[üu]fung
        | deutsches\s+sprachdiplom
        | telc\s+deutsch\s+c1\s+hochschule
        | \b(?:ö|oe)sd\s*c2
        | (?:österreichisches|oesterreichisches)\s+sprachdiplom
        ",
    )
    .expect("valid German certificate regex")
});

static TOEFL_SCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{2,3}\b").expect("valid TOEFL regex"));

static IELTS_BAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d(?:[.,]\d)?\b").expect("valid IELTS regex"));

/// Internet-based TOEFL minimum. Paper-based scores are higher still.
const TOEFL_MIN_SCORE: f64 = 80.0;
const IELTS_MIN_BAND: f64 = 6.0;

fn numbers<'a>(pattern: &'a Regex, text: &'a str) -> impl Iterator<Item = f64> + 'a {
    pattern
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
}

// ── Evaluation ───────────────────────────────────────────

/// Status of the applicant's language proof.
///
/// `texts` holds the recognized text of every submitted language certificate.
pub fn evaluate_language_status(
    track: ProgramTrack,
    texts: &[String],
    bachelor_country: Option<&str>,
) -> LanguageStatus {
    let status = match track {
        ProgramTrack::Bwl => german_status(texts, bachelor_country),
        ProgramTrack::Ai => english_status(texts),
    };
    tracing::debug!(
        track = %track,
        certificates = texts.len(),
        status = status.label(),
        "Language status evaluated"
    );
    status
}

fn german_status(texts: &[String], bachelor_country: Option<&str>) -> LanguageStatus {
    if bachelor_country.and_then(normalize_country_name) == Some("germany") {
        return LanguageStatus::NotNecessary;
    }
    if texts.is_empty() {
        return LanguageStatus::RequiredMissing;
    }
    if texts.iter().any(|t| GERMAN_ADVANCED.is_match(t)) {
        LanguageStatus::GermanAdvanced
    } else {
        LanguageStatus::GermanUnclassified
    }
}

fn english_status(texts: &[String]) -> LanguageStatus {
    if texts.is_empty() {
        return LanguageStatus::RequiredMissing;
    }
    let text = texts.join("\n").to_lowercase();

    if text.contains("toefl") {
        return if numbers(&TOEFL_SCORE, &text).any(|n| n >= TOEFL_MIN_SCORE) {
            LanguageStatus::ToeflSufficient
        } else {
            LanguageStatus::ToeflUnclear
        };
    }

    if text.contains("ielts") {
        return if numbers(&IELTS_BAND, &text).any(|n| n >= IELTS_MIN_BAND) {
            LanguageStatus::IeltsSufficient
        } else {
            LanguageStatus::IeltsUnclear
        };
    }

    if text.contains("cambridge") || text.contains("linguaskill") {
        return if text.contains("b2") || text.contains("c1") {
            LanguageStatus::CambridgeB2Plus
        } else {
            LanguageStatus::CambridgeUnclassified
        };
    }

    if text.contains("abitur") && text.contains("engl") {
        return LanguageStatus::AbiturEnglish;
    }

    if text.contains("medium of instruction") || text.contains("language of instruction") {
        return if text.contains("english") {
            LanguageStatus::EnglishMedium
        } else {
            LanguageStatus::MediumUnclassified
        };
    }

    LanguageStatus::EnglishUnclassified
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn german_bachelor_needs_no_certificate() {
        let status = evaluate_language_status(ProgramTrack::Bwl, &[], Some("Deutschland"));
        assert_eq!(status, LanguageStatus::NotNecessary);
        assert_eq!(status.label(), "not necessary");
    }

    #[test]
    fn bwl_without_certificate_is_missing() {
        let status = evaluate_language_status(ProgramTrack::Bwl, &[], Some("Italien"));
        assert_eq!(status, LanguageStatus::RequiredMissing);
        assert!(!status.is_satisfied());
        assert_eq!(
            evaluate_language_status(ProgramTrack::Bwl, &[], None),
            LanguageStatus::RequiredMissing
        );
    }

    #[test]
    fn bwl_recognizes_advanced_german() {
        for sample in [
            "Deutsche Sprachprüfung für den Hochschulzugang DSH-2",
            "TestDaF Zeugnis",
            "Goethe-Zertifikat C2",
            "Großes Deutsches Sprachdiplom",
            "telc Deutsch C1 Hochschule",
            "ÖSD C2 Wien",
        ] {
            assert_eq!(
                evaluate_language_status(ProgramTrack::Bwl, &texts(&[sample]), Some("Spain")),
                LanguageStatus::GermanAdvanced,
                "{sample}"
            );
        }
    }

    #[test]
    fn bwl_other_german_certificate_is_unclassified() {
        let status = evaluate_language_status(
            ProgramTrack::Bwl,
            &texts(&["Goethe-Zertifikat B1"]),
            Some("France"),
        );
        assert_eq!(status, LanguageStatus::GermanUnclassified);
    }

    #[test]
    fn ai_requires_english_proof_even_for_germans() {
        let status = evaluate_language_status(ProgramTrack::Ai, &[], Some("Germany"));
        assert_eq!(status, LanguageStatus::RequiredMissing);
    }

    #[test]
    fn toefl_score_threshold() {
        let good = texts(&["TOEFL iBT Total Score 95"]);
        let weak = texts(&["TOEFL iBT Total Score 61"]);
        assert_eq!(
            evaluate_language_status(ProgramTrack::Ai, &good, None),
            LanguageStatus::ToeflSufficient
        );
        assert_eq!(
            evaluate_language_status(ProgramTrack::Ai, &weak, None),
            LanguageStatus::ToeflUnclear
        );
    }

    #[test]
    fn ielts_band_threshold() {
        let good = texts(&["IELTS Overall Band Score 6,5"]);
        let weak = texts(&["IELTS Overall Band Score 5.5"]);
        assert_eq!(
            evaluate_language_status(ProgramTrack::Ai, &good, None),
            LanguageStatus::IeltsSufficient
        );
        assert_eq!(
            evaluate_language_status(ProgramTrack::Ai, &weak, None),
            LanguageStatus::IeltsUnclear
        );
    }

    #[test]
    fn cambridge_and_abitur() {
        assert_eq!(
            evaluate_language_status(
                ProgramTrack::Ai,
                &texts(&["Cambridge English: C1 Advanced"]),
                None
            ),
            LanguageStatus::CambridgeB2Plus
        );
        assert_eq!(
            evaluate_language_status(ProgramTrack::Ai, &texts(&["Linguaskill report"]), None),
            LanguageStatus::CambridgeUnclassified
        );
        assert_eq!(
            evaluate_language_status(
                ProgramTrack::Ai,
                &texts(&["Zeugnis der Allgemeinen Hochschulreife (Abitur)", "Englisch 12 Punkte"]),
                None
            ),
            LanguageStatus::AbiturEnglish
        );
    }

    #[test]
    fn medium_of_instruction_letters() {
        assert_eq!(
            evaluate_language_status(
                ProgramTrack::Ai,
                &texts(&["The medium of instruction was English."]),
                None
            ),
            LanguageStatus::EnglishMedium
        );
        assert_eq!(
            evaluate_language_status(
                ProgramTrack::Ai,
                &texts(&["Language of instruction: Spanish"]),
                None
            ),
            LanguageStatus::MediumUnclassified
        );
        assert_eq!(
            evaluate_language_status(ProgramTrack::Ai, &texts(&["Certificate"]), None),
            LanguageStatus::EnglishUnclassified
        );
    }
}
