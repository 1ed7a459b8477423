//! Table row reconstruction from positioned OCR tokens.

use super::types::Token;

/// Maximum vertical centroid distance between neighbouring tokens of one row.
pub const ROW_THRESHOLD_PX: f64 = 10.0;

/// Tokens sharing a visual line, left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub tokens: Vec<Token>,
    pub text: String,
}

impl Row {
    fn from_tokens(mut tokens: Vec<Token>) -> Self {
        tokens.sort_by(|a, b| a.bounding_box.x.cmp(&b.bounding_box.x));
        let text = tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self { tokens, text }
    }
}

/// Group tokens into rows in one sweep over tokens sorted by (centroid y, x).
///
/// A token joins the open row when its vertical centroid lies within
/// [`ROW_THRESHOLD_PX`] of the previous token's. Empty tokens and table
/// rulings (`|`) are dropped.
pub fn group_rows(tokens: &[Token]) -> Vec<Row> {
    let mut sorted: Vec<&Token> = tokens
        .iter()
        .filter(|t| {
            let text = t.text.trim();
            !text.is_empty() && text != "|"
        })
        .collect();
    sorted.sort_by(|a, b| {
        a.center_y()
            .total_cmp(&b.center_y())
            .then(a.bounding_box.x.cmp(&b.bounding_box.x))
    });

    let mut rows = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut previous_y: Option<f64> = None;

    for token in sorted {
        let y = token.center_y();
        if let Some(prev) = previous_y {
            if (y - prev).abs() > ROW_THRESHOLD_PX {
                rows.push(Row::from_tokens(std::mem::take(&mut current)));
            }
        }
        current.push(token.clone());
        previous_y = Some(y);
    }
    if !current.is_empty() {
        rows.push(Row::from_tokens(current));
    }

    rows
}
