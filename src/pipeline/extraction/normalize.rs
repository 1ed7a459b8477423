//! Text canonicalization for comparing OCR output against module names.

use std::sync::LazyLock;

use regex::Regex;

/// A run of at least four letters marks a line as carrying real words.
static LETTER_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-zÄÖÜäöüß]{4,}").expect("valid letter-run regex"));

/// Lowercase, fold German diacritics, drop punctuation, collapse whitespace.
///
/// `normalize_text("Müller-Straße")` → `"mueller strasse"`.
pub fn normalize_text(input: &str) -> String {
    let mut folded = String::with_capacity(input.len());
    for c in input.chars().flat_map(char::to_lowercase) {
        match c {
            'ä' => folded.push_str("ae"),
            'ö' => folded.push_str("oe"),
            'ü' => folded.push_str("ue"),
            'ß' => folded.push_str("ss"),
            'a'..='z' | '0'..='9' => folded.push(c),
            // Everything else, whitespace included, separates words.
            _ => folded.push(' '),
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// OCR noise: blank, or digits without any real word.
pub fn is_noise_line(line: &str) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    if LETTER_RUN.is_match(line) {
        return false;
    }
    line.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_diacritics_and_case() {
        assert_eq!(normalize_text("Müller-Straße"), "mueller strasse");
        assert_eq!(
            normalize_text("Müller-Straße"),
            normalize_text("MUELLER-STRASSE")
        );
    }

    #[test]
    fn uppercase_umlauts_fold_too() {
        assert_eq!(normalize_text("ÖKONOMETRIE"), "oekonometrie");
        assert_eq!(normalize_text("Übung"), "uebung");
    }

    #[test]
    fn strips_punctuation_and_collapses_whitespace() {
        assert_eq!(
            normalize_text("  Statistik   I:\tGrundlagen (5 CP) "),
            "statistik i grundlagen 5 cp"
        );
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" -- // "), "");
    }

    #[test]
    fn non_german_accents_become_separators() {
        assert_eq!(normalize_text("Économie"), "conomie");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_text("Mathematik für Ökonomen II");
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn noise_lines() {
        assert!(is_noise_line(""));
        assert!(is_noise_line("   "));
        assert!(is_noise_line("12 | 3,0 | 5"));
        assert!(is_noise_line("WS 2019 1.7"));
        assert!(!is_noise_line("Mathematik I 8 CP"));
        assert!(!is_noise_line("Übung"));
        // No digits and no words: kept for the matcher to reject.
        assert!(!is_noise_line("ab cd"));
    }
}
