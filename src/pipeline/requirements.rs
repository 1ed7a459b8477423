//! Admission requirement evaluation: minimum credits per category plus a
//! maximum overall grade.

use serde::Serialize;

use crate::config::CreditRequirement;
use crate::pipeline::matching::CategorySums;

/// A recognized grade differing from the claimed one by at least this much is
/// reported.
pub const GRADE_MISMATCH_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeSource {
    Recognized,
    Claimed,
    None,
}

impl GradeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recognized => "OCR",
            Self::Claimed => "Claimed",
            Self::None => "None",
        }
    }
}

/// The grade used for the verdict and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedGrade {
    pub value: Option<f64>,
    pub source: GradeSource,
    /// Recognized and claimed grade both present but apart.
    pub mismatch: bool,
}

/// Prefer the grade recognized from the documents, fall back to the claimed one.
pub fn resolve_grade(recognized: Option<f64>, claimed: Option<f64>) -> ResolvedGrade {
    match (recognized, claimed) {
        (Some(value), claimed) => ResolvedGrade {
            value: Some(value),
            source: GradeSource::Recognized,
            mismatch: claimed.is_some_and(|c| (value - c).abs() >= GRADE_MISMATCH_THRESHOLD),
        },
        (None, Some(value)) => ResolvedGrade {
            value: Some(value),
            source: GradeSource::Claimed,
            mismatch: false,
        },
        (None, None) => ResolvedGrade {
            value: None,
            source: GradeSource::None,
            mismatch: false,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequirementEvaluation {
    pub fulfilled: bool,
    pub credits_fulfilled: bool,
    pub grade_ok: bool,
    pub reasons: Vec<String>,
}

impl RequirementEvaluation {
    pub fn status(&self) -> &'static str {
        if self.fulfilled {
            "Fulfilled"
        } else {
            "Not fulfilled"
        }
    }

    /// Reasons joined for display.
    pub fn details(&self) -> String {
        if self.reasons.is_empty() {
            "All criteria fulfilled.".to_string()
        } else {
            self.reasons.join("; ")
        }
    }
}

/// Check category credits against their minimums and the grade against
/// `max_grade` (lower is better).
///
/// Without any requirement the credit check fails. Unrecognized module lines
/// are reported but never fail the check on their own.
pub fn evaluate_requirements(
    sums: &CategorySums,
    unrecognized: &[String],
    requirements: &[CreditRequirement],
    grade: Option<f64>,
    max_grade: f64,
) -> RequirementEvaluation {
    let mut reasons = Vec::new();

    let mut credits_fulfilled = !requirements.is_empty();
    if requirements.is_empty() {
        reasons.push("No credit requirements configured.".to_string());
    }
    for req in requirements {
        let value = sums.get(&req.category).unwrap_or(0.0);
        if value < req.min_credits {
            reasons.push(format!(
                "{}: not enough ECTS ({:?} < {:?})",
                req.category, value, req.min_credits
            ));
            credits_fulfilled = false;
        }
    }

    if !unrecognized.is_empty() {
        reasons.push(format!("{} unrecognized module line(s)", unrecognized.len()));
    }

    let grade_ok = match grade {
        None => {
            reasons.push("No usable grade found.".to_string());
            false
        }
        Some(g) if g > max_grade => {
            reasons.push(format!("Grade too low ({g:?} > {max_grade:?})."));
            false
        }
        Some(_) => true,
    };

    let evaluation = RequirementEvaluation {
        fulfilled: credits_fulfilled && grade_ok,
        credits_fulfilled,
        grade_ok,
        reasons,
    };
    tracing::debug!(
        fulfilled = evaluation.fulfilled,
        credits_fulfilled,
        grade_ok,
        reasons = evaluation.reasons.len(),
        "Requirements evaluated"
    );
    evaluation
}
