//! National grade scales and conversion to the German 1.0–4.0 scale.
//!
//! Conversion is linear between a country's best and passing grade
//! ("modified Bavarian formula"): best maps to 1.0, pass maps to 4.0.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::{GradeCheckReason, ScaleDirection};

/// Allowed gap between the converted and the claimed German grade.
pub const DEFAULT_GRADE_TOLERANCE: f64 = 0.2;

/// Foreign grades further than this outside the scale are rejected outright.
const SCALE_MARGIN: f64 = 5.0;

const EPSILON: f64 = 1e-6;

const GERMAN_BEST: f64 = 1.0;
const GERMAN_PASS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradeScale {
    pub direction: ScaleDirection,
    pub best: f64,
    pub pass: f64,
}

impl GradeScale {
    const fn ascending(best: f64, pass: f64) -> Self {
        Self {
            direction: ScaleDirection::Ascending,
            best,
            pass,
        }
    }

    const fn descending(best: f64, pass: f64) -> Self {
        Self {
            direction: ScaleDirection::Descending,
            best,
            pass,
        }
    }

    /// Unclamped German equivalent, `None` for a degenerate scale.
    fn raw_german(&self, grade: f64) -> Option<f64> {
        let (numerator, denominator) = match self.direction {
            ScaleDirection::Descending => (grade - self.best, self.pass - self.best),
            ScaleDirection::Ascending => (self.best - grade, self.best - self.pass),
        };
        if denominator.abs() < EPSILON {
            return None;
        }
        let raw = GERMAN_BEST + (GERMAN_PASS - GERMAN_BEST) * numerator / denominator;
        raw.is_finite().then_some(raw)
    }
}

/// Canonical country → scale.
const COUNTRY_SCALES: &[(&str, GradeScale)] = &[
    ("germany", GradeScale::descending(1.0, 4.0)),
    ("austria", GradeScale::descending(1.0, 4.0)),
    ("switzerland", GradeScale::ascending(6.0, 4.0)),
    ("united kingdom", GradeScale::ascending(100.0, 40.0)),
    ("united states", GradeScale::ascending(4.0, 2.0)),
    ("canada", GradeScale::ascending(4.0, 2.0)),
    ("turkey", GradeScale::ascending(4.0, 2.0)),
    ("india", GradeScale::ascending(100.0, 40.0)),
    ("italy", GradeScale::ascending(30.0, 18.0)),
    ("france", GradeScale::ascending(20.0, 10.0)),
    ("spain", GradeScale::ascending(10.0, 5.0)),
    ("netherlands", GradeScale::ascending(10.0, 5.5)),
    ("belgium", GradeScale::ascending(20.0, 10.0)),
    ("china", GradeScale::ascending(100.0, 60.0)),
    ("poland", GradeScale::ascending(5.0, 3.0)),
    ("portugal", GradeScale::ascending(20.0, 10.0)),
    ("brazil", GradeScale::ascending(10.0, 5.0)),
    ("russia", GradeScale::ascending(5.0, 3.0)),
];

/// Lowercased alias → canonical country name.
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("germany", "germany"),
    ("bundesrepublik deutschland", "germany"),
    ("deutschland", "germany"),
    ("austria", "austria"),
    ("österreich", "austria"),
    ("oesterreich", "austria"),
    ("switzerland", "switzerland"),
    ("schweiz", "switzerland"),
    ("suisse", "switzerland"),
    ("united kingdom", "united kingdom"),
    ("uk", "united kingdom"),
    ("vereinigtes königreich", "united kingdom"),
    ("vereinigtes koenigreich", "united kingdom"),
    ("england", "united kingdom"),
    ("scotland", "united kingdom"),
    ("wales", "united kingdom"),
    ("northern ireland", "united kingdom"),
    ("united states", "united states"),
    ("united states of america", "united states"),
    ("usa", "united states"),
    ("u.s.a.", "united states"),
    ("canada", "canada"),
    ("kanada", "canada"),
    ("turkey", "turkey"),
    ("türkei", "turkey"),
    ("tuerkei", "turkey"),
    ("india", "india"),
    ("indien", "india"),
    ("italy", "italy"),
    ("italien", "italy"),
    ("france", "france"),
    ("frankreich", "france"),
    ("spain", "spain"),
    ("spanien", "spain"),
    ("netherlands", "netherlands"),
    ("niederlande", "netherlands"),
    ("the netherlands", "netherlands"),
    ("belgium", "belgium"),
    ("belgien", "belgium"),
    ("china", "china"),
    ("pr china", "china"),
    ("people's republic of china", "china"),
    ("peoples republic of china", "china"),
    ("poland", "poland"),
    ("polen", "poland"),
    ("portugal", "portugal"),
    ("brazil", "brazil"),
    ("brasilien", "brazil"),
    ("russia", "russia"),
    ("russland", "russia"),
    ("russian federation", "russia"),
];

/// Lines naming the final grade of a degree.
const OVERALL_GRADE_KEYWORDS: &[&str] = &[
    "gesamtnote",
    "abschlussnote",
    "abschlusspruefung",
    "abschlussprüfung",
    "average mark",
    "overall grade",
    "overall result",
    "overall mark",
    "final grade",
    "final result",
    "gesamturteil",
    "gesamtbewertung",
    "gesamtprädikat",
    "gesamtpraedikat",
    "gesamtleistung",
];

static GRADE_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([0-6][.,]\d{1,2})\b").expect("valid grade regex"));

/// Canonical country for a raw (German or English) country name.
pub fn normalize_country_name(raw: &str) -> Option<&'static str> {
    let key = raw.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, country)| *country)
}

pub fn get_country_scale(country: &str) -> Option<GradeScale> {
    let canonical = normalize_country_name(country)?;
    COUNTRY_SCALES
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, scale)| *scale)
}

/// Convert a foreign grade to the German scale, rounded to two decimals.
///
/// `None` for unknown countries, grades far outside the country's scale, and
/// results that fall outside 1.0–4.0 (i.e. failing grades).
pub fn convert_to_german(country: &str, foreign_grade: f64) -> Option<f64> {
    let scale = get_country_scale(country)?;
    if !foreign_grade.is_finite() {
        return None;
    }

    let low = scale.best.min(scale.pass) - SCALE_MARGIN;
    let high = scale.best.max(scale.pass) + SCALE_MARGIN;
    if foreign_grade < low || foreign_grade > high {
        return None;
    }

    let raw = scale.raw_german(foreign_grade)?;
    if raw < GERMAN_BEST - EPSILON || raw > GERMAN_PASS + EPSILON {
        return None;
    }
    let german = raw.clamp(GERMAN_BEST, GERMAN_PASS);
    Some((german * 100.0).round() / 100.0)
}

/// Outcome of comparing a claimed German grade with the converted foreign one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradeVerification {
    /// `None` when no comparison was possible.
    pub consistent: Option<bool>,
    pub converted: Option<f64>,
    pub reason: GradeCheckReason,
}

pub fn verify_grade(
    country: &str,
    foreign_grade: f64,
    claimed_german: Option<f64>,
    tolerance: f64,
) -> GradeVerification {
    let Some(claimed) = claimed_german else {
        return GradeVerification {
            consistent: None,
            converted: None,
            reason: GradeCheckReason::NoClaimedGrade,
        };
    };
    let Some(converted) = convert_to_german(country, foreign_grade) else {
        return GradeVerification {
            consistent: None,
            converted: None,
            reason: GradeCheckReason::NoScaleOrInvalidForeign,
        };
    };

    let consistent = (converted - claimed).abs() <= tolerance;
    GradeVerification {
        consistent: Some(consistent),
        converted: Some(converted),
        reason: if consistent {
            GradeCheckReason::Ok
        } else {
            GradeCheckReason::BavarianMismatch
        },
    }
}

/// Overall grade from recognized certificate text: the first grade on the
/// first line that names the final grade.
pub fn extract_overall_grade(text: &str) -> Option<f64> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            OVERALL_GRADE_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .find_map(|line| {
            let caps = GRADE_VALUE.captures(line)?;
            caps[1].replace(',', ".").parse().ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn aliases_are_case_insensitive() {
        assert_eq!(normalize_country_name("  Deutschland "), Some("germany"));
        assert_eq!(normalize_country_name("UK"), Some("united kingdom"));
        assert_eq!(normalize_country_name("USA"), Some("united states"));
        assert_eq!(normalize_country_name("Türkei"), Some("turkey"));
        assert_eq!(normalize_country_name("Atlantis"), None);
        assert_eq!(normalize_country_name(""), None);
    }

    #[test]
    fn every_alias_has_a_scale() {
        for (alias, _) in COUNTRY_ALIASES {
            assert!(get_country_scale(alias).is_some(), "no scale for {alias}");
        }
    }

    #[test]
    fn descending_scale_boundaries() {
        assert!(approx(convert_to_german("germany", 1.0), 1.0));
        assert!(approx(convert_to_german("germany", 4.0), 4.0));
        assert!(approx(convert_to_german("austria", 2.5), 2.5));
    }

    #[test]
    fn ascending_scale_boundaries() {
        assert!(approx(convert_to_german("usa", 4.0), 1.0));
        assert!(approx(convert_to_german("usa", 2.0), 4.0));
        // 1 + 3 * (4.0 - 3.3) / 2.0 = 2.05
        assert!(approx(convert_to_german("United States", 3.3), 2.05));
        // 1 + 3 * (30 - 27) / 12 = 1.75
        assert!(approx(convert_to_german("Italien", 27.0), 1.75));
    }

    #[test]
    fn failing_and_out_of_range_grades_rejected() {
        // Below pass: raw grade above 4.0.
        assert_eq!(convert_to_german("usa", 1.5), None);
        // Far outside the scale.
        assert_eq!(convert_to_german("france", 40.0), None);
        assert_eq!(convert_to_german("germany", f64::NAN), None);
        assert_eq!(convert_to_german("atlantis", 2.0), None);
    }

    #[test]
    fn above_best_is_rejected() {
        // Better than best would map below 1.0.
        assert_eq!(convert_to_german("switzerland", 6.5), None);
    }

    #[test]
    fn result_rounded_to_two_decimals() {
        // 1 + 3 * (10 - 8.3) / 4.5 = 2.1333...
        assert!(approx(convert_to_german("netherlands", 8.3), 2.13));
    }

    #[test]
    fn verify_without_claim() {
        let v = verify_grade("germany", 2.0, None, DEFAULT_GRADE_TOLERANCE);
        assert_eq!(v.consistent, None);
        assert_eq!(v.converted, None);
        assert_eq!(v.reason, GradeCheckReason::NoClaimedGrade);
    }

    #[test]
    fn verify_unknown_country() {
        let v = verify_grade("Atlantis", 2.0, Some(2.0), DEFAULT_GRADE_TOLERANCE);
        assert_eq!(v.consistent, None);
        assert_eq!(v.reason, GradeCheckReason::NoScaleOrInvalidForeign);
    }

    #[test]
    fn verify_within_and_outside_tolerance() {
        let ok = verify_grade("usa", 3.3, Some(2.1), DEFAULT_GRADE_TOLERANCE);
        assert_eq!(ok.consistent, Some(true));
        assert!(approx(ok.converted, 2.05));
        assert_eq!(ok.reason, GradeCheckReason::Ok);

        let mismatch = verify_grade("usa", 3.3, Some(1.5), DEFAULT_GRADE_TOLERANCE);
        assert_eq!(mismatch.consistent, Some(false));
        assert!(approx(mismatch.converted, 2.05));
        assert_eq!(mismatch.reason, GradeCheckReason::BavarianMismatch);
    }

    #[test]
    fn overall_grade_from_keyword_line() {
        let text = "Bachelorzeugnis\nStatistik 1,3\nGesamtnote: 2,1 (gut)\nAbschlussnote 1,0";
        assert!(approx(extract_overall_grade(text), 2.1));
        assert!(approx(extract_overall_grade("Overall grade 1.75"), 1.75));
    }

    #[test]
    fn overall_grade_requires_keyword_and_value() {
        assert_eq!(extract_overall_grade("Statistik 1,3"), None);
        assert_eq!(extract_overall_grade("Gesamtnote: gut"), None);
        // Keyword line without value falls through to the next keyword line.
        assert!(approx(
            extract_overall_grade("Gesamtnote\nFinal grade: 1.7"),
            1.7
        ));
    }
}
