// Credit column detection for token rows of scanned transcript tables.
// The header keywords of the credit column locate it horizontally; each row's
// credit value is then the numeric token closest to that position.

use std::sync::LazyLock;

use regex::Regex;

use super::rows::Row;

/// Header keywords marking the credit column (matched as substrings of the
/// lowercased token text).
const HEADER_KEYWORDS: &[&str] = &["ects", "lp", "credit", "credits", "leistungspunkte", "cp"];

/// Only the top of the page is searched for the table header.
const HEADER_SEARCH_ROWS: usize = 20;

/// Maximum horizontal distance between a value's centroid and the column.
pub const MAX_COLUMN_DISTANCE_PX: f64 = 40.0;

/// Plausible credits for a single module, exclusive lower bound.
const MIN_CREDITS: f64 = 0.0;
const MAX_CREDITS: f64 = 40.0;

static CREDIT_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:[.,]\d+)?$").expect("valid credit number regex"));

/// A number directly followed by a credit unit, e.g. `8 CP`, `7,5 ECTS`.
static INLINE_CREDIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+(?:[.,]\d+)?)\s*(?:credit points|credits|leistungspunkte|ects|cp|lp)\b",
    )
    .expect("valid inline credit regex")
});

/// Horizontal position of the credit column: the median x-centroid of the
/// header-keyword tokens in the first rows, or `None` without a header.
pub fn detect_credit_column(rows: &[Row]) -> Option<f64> {
    let mut candidates: Vec<f64> = rows
        .iter()
        .take(HEADER_SEARCH_ROWS)
        .flat_map(|row| &row.tokens)
        .filter(|token| {
            let text = token.text.to_lowercase();
            HEADER_KEYWORDS.iter().any(|kw| text.contains(kw))
        })
        .map(|token| token.center_x())
        .collect();

    if candidates.is_empty() {
        return None;
    }

    candidates.sort_by(f64::total_cmp);
    let mid = candidates.len() / 2;
    if candidates.len() % 2 == 1 {
        Some(candidates[mid])
    } else {
        Some((candidates[mid - 1] + candidates[mid]) / 2.0)
    }
}

/// Parse a whole token as a credit number; `,` is accepted as decimal separator.
pub fn parse_credit_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if !CREDIT_NUMBER.is_match(text) {
        return None;
    }
    text.replace(',', ".").parse().ok()
}

fn is_plausible(value: f64) -> bool {
    value > MIN_CREDITS && value <= MAX_CREDITS
}

/// The plausible number in `row` nearest the column at `column_x`, if one lies
/// within [`MAX_COLUMN_DISTANCE_PX`]. The first token wins on equal distance.
pub fn credit_value_in_row(row: &Row, column_x: f64) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;

    for token in &row.tokens {
        let Some(value) = parse_credit_number(&token.text) else {
            continue;
        };
        if !is_plausible(value) {
            continue;
        }
        let distance = (token.center_x() - column_x).abs();
        if distance > MAX_COLUMN_DISTANCE_PX {
            continue;
        }
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((value, distance));
        }
    }

    best.map(|(value, _)| value)
}

/// First plausible number written with a credit unit on a text line.
pub fn inline_credit_value(line: &str) -> Option<f64> {
    INLINE_CREDIT
        .captures_iter(line)
        .filter_map(|caps| caps[1].replace(',', ".").parse::<f64>().ok())
        .find(|v| is_plausible(*v))
}
