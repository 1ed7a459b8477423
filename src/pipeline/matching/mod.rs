//! Module matching: recognizes configured module names in OCR rows.
//!
//! A module matches a row strictly when its normalized name is a substring of
//! the normalized row text. Without any strict hit, rows fall back to fuzzy
//! matching with a Ratcliff/Obershelp block ratio of at least
//! [`FUZZY_THRESHOLD`]. Among overlapping hits only the most specific (longest)
//! names survive.

pub mod aggregate;

pub use aggregate::*;

use crate::pipeline::extraction::normalize::normalize_text;

/// Minimum block-similarity ratio for a fuzzy module match.
pub const FUZZY_THRESHOLD: f64 = 0.80;

/// A module from the program mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDefinition {
    /// Trimmed, lowercased module name.
    pub name: String,
    pub category: String,
    /// Fixed credit value, when the mapping knows it.
    pub credits: Option<f64>,
    normalized: String,
}

impl ModuleDefinition {
    /// `None` when the name or category is empty after trimming.
    pub fn new(name: &str, category: &str, credits: Option<f64>) -> Option<Self> {
        let name = name.trim().to_lowercase();
        let category = category.trim().to_string();
        if name.is_empty() || category.is_empty() {
            return None;
        }
        let normalized = normalize_text(&name);
        Some(Self {
            name,
            category,
            credits,
            normalized,
        })
    }

    pub fn normalized_name(&self) -> &str {
        &self.normalized
    }
}

/// Read-only list of module definitions, longest names first.
#[derive(Debug, Clone, Default)]
pub struct ModuleMapping {
    modules: Vec<ModuleDefinition>,
}

impl ModuleMapping {
    pub fn new(mut modules: Vec<ModuleDefinition>) -> Self {
        // Stable: equal lengths keep mapping order.
        modules.sort_by(|a, b| b.name.chars().count().cmp(&a.name.chars().count()));
        Self { modules }
    }

    /// Build from (module name, category) pairs, dropping empty entries.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::new(
            pairs
                .into_iter()
                .filter_map(|(name, category)| {
                    ModuleDefinition::new(name.as_ref(), category.as_ref(), None)
                })
                .collect(),
        )
    }

    pub fn modules(&self) -> &[ModuleDefinition] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Modules recognized in one row of text.
///
/// Strict hits suppress fuzzy hits; the result is conflict-resolved.
pub fn match_modules_in_row<'a>(
    row_text: &str,
    mapping: &'a ModuleMapping,
    allow_fuzzy: bool,
) -> Vec<&'a ModuleDefinition> {
    let text = normalize_text(row_text);
    if text.is_empty() {
        return Vec::new();
    }

    let mut strict = Vec::new();
    let mut fuzzy = Vec::new();
    for module in mapping.modules() {
        let name = module.normalized_name();
        if name.is_empty() {
            continue;
        }
        if text.contains(name) {
            strict.push(module);
        } else if allow_fuzzy && strict.is_empty() && similarity_ratio(name, &text) >= FUZZY_THRESHOLD
        {
            fuzzy.push(module);
        }
    }

    if !strict.is_empty() {
        resolve_conflicts_keep_specific(strict)
    } else {
        resolve_conflicts_keep_specific(fuzzy)
    }
}

/// Keep only the most specific modules: a candidate whose normalized name is
/// contained in an already kept, different name is dropped.
pub fn resolve_conflicts_keep_specific(
    mut modules: Vec<&ModuleDefinition>,
) -> Vec<&ModuleDefinition> {
    if modules.len() <= 1 {
        return modules;
    }
    modules.sort_by(|a, b| {
        b.normalized_name()
            .len()
            .cmp(&a.normalized_name().len())
    });

    let mut kept: Vec<&ModuleDefinition> = Vec::with_capacity(modules.len());
    for module in modules {
        let name = module.normalized_name();
        let shadowed = kept.iter().any(|k| {
            let kept_name = k.normalized_name();
            kept_name != name && kept_name.contains(name)
        });
        if !shadowed {
            kept.push(module);
        }
    }
    kept
}

/// Ratcliff/Obershelp similarity: `2·M / (|a| + |b|)` where `M` counts the
/// characters in recursively found longest common blocks. Two empty strings
/// are identical.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(&a, &b) as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_common_block(&a[alo..ahi], &b[blo..bhi]);
        if size == 0 {
            continue;
        }
        matched += size;
        let (i, j) = (alo + i, blo + j);
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }
    matched
}

/// Longest common contiguous block as (start in a, start in b, length).
/// Ties go to the earliest start in `a`, then in `b`.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb { previous[j] + 1 } else { 0 };
            let run = current[j + 1];
            if run > best.2 {
                best = (i + 1 - run, j + 1 - run, run);
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, &str)]) -> ModuleMapping {
        ModuleMapping::from_pairs(pairs.iter().copied())
    }

    fn names(hits: &[&ModuleDefinition]) -> Vec<String> {
        hits.iter().map(|m| m.name.clone()).collect()
    }

    #[test]
    fn mapping_drops_empty_entries_and_lowercases() {
        let m = mapping(&[
            ("  Mathematik ", "Mathematik"),
            ("", "BWL"),
            ("Marketing", "  "),
        ]);
        assert_eq!(m.len(), 1);
        assert_eq!(m.modules()[0].name, "mathematik");
        assert_eq!(m.modules()[0].category, "Mathematik");
    }

    #[test]
    fn mapping_orders_longest_name_first() {
        let m = mapping(&[("vwl", "VWL"), ("mikrooekonomik", "VWL"), ("statistik i", "Statistik")]);
        let order: Vec<&str> = m.modules().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(order, vec!["mikrooekonomik", "statistik i", "vwl"]);
    }

    #[test]
    fn keeps_most_specific_strict_match() {
        let m = mapping(&[("Statistik", "Statistik"), ("Statistik I", "Statistik")]);
        let hits = match_modules_in_row("Statistik I Grundlagen", &m, true);
        assert_eq!(names(&hits), vec!["statistik i"]);
    }

    #[test]
    fn strict_match_uses_normalized_text() {
        let m = mapping(&[("Mathematik für Ökonomen", "Mathematik")]);
        let hits = match_modules_in_row("MATHEMATIK FUER OEKONOMEN | 8 | 1,3", &m, true);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn fuzzy_match_tolerates_ocr_noise() {
        let m = mapping(&[("marketing", "BWL")]);
        let hits = match_modules_in_row("Marketlng", &m, true);
        assert_eq!(names(&hits), vec!["marketing"]);
        assert!(match_modules_in_row("Marketlng", &m, false).is_empty());
    }

    #[test]
    fn strict_hit_suppresses_fuzzy_hits() {
        let m = mapping(&[("marketing", "BWL"), ("marketinq", "BWL")]);
        let hits = match_modules_in_row("marketing", &m, true);
        assert_eq!(names(&hits), vec!["marketing"]);
    }

    #[test]
    fn unrelated_row_matches_nothing() {
        let m = mapping(&[("statistik", "Statistik")]);
        assert!(match_modules_in_row("Wintersemester 2019", &m, true).is_empty());
        assert!(match_modules_in_row(" -- ", &m, true).is_empty());
    }

    #[test]
    fn disjoint_modules_both_kept() {
        let m = mapping(&[("statistik", "Statistik"), ("marketing", "BWL")]);
        let hits = match_modules_in_row("Statistik und Marketing", &m, true);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn similarity_matches_block_ratio() {
        assert!((similarity_ratio("abcd", "abcd") - 1.0).abs() < 1e-9);
        assert!((similarity_ratio("", "") - 1.0).abs() < 1e-9);
        assert!(similarity_ratio("abc", "").abs() < 1e-9);
        // "abcd" vs "bcde": common block "bcd", 2*3/8
        assert!((similarity_ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
        // "marketing" vs "marketlng": blocks "market" + "ng", 2*8/18
        assert!((similarity_ratio("marketing", "marketlng") - 16.0 / 18.0).abs() < 1e-9);
    }

    #[test]
    fn similarity_recurses_on_both_sides() {
        // Longest block "cd", then "a" left of it and "f" right of it.
        assert!((similarity_ratio("abcdef", "axcdyf") - 8.0 / 12.0).abs() < 1e-9);
    }
}
