use std::collections::HashSet;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::ModuleDefinition;

/// Credits accumulated per requested category, in request order.
///
/// Every requested category is present; unmatched ones stay at 0.0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategorySums {
    entries: Vec<(String, f64)>,
}

impl CategorySums {
    pub fn new(categories: &[String]) -> Self {
        let mut entries: Vec<(String, f64)> = Vec::with_capacity(categories.len());
        for category in categories {
            if !entries.iter().any(|(c, _)| c == category) {
                entries.push((category.clone(), 0.0));
            }
        }
        Self { entries }
    }

    pub fn contains(&self, category: &str) -> bool {
        self.entries.iter().any(|(c, _)| c == category)
    }

    pub fn get(&self, category: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(c, _)| c == category)
            .map(|(_, v)| *v)
    }

    /// Add credits to a requested category. Unknown categories and
    /// non-positive values are ignored.
    pub fn add(&mut self, category: &str, credits: f64) -> bool {
        if !(credits > 0.0) {
            return false;
        }
        match self.entries.iter_mut().find(|(c, _)| c == category) {
            Some((_, total)) => {
                *total += credits;
                true
            }
            None => false,
        }
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, v)| v).sum()
    }

    /// Copy with every sum rounded to two decimals.
    pub fn rounded(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(c, v)| (c.clone(), round2(*v)))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for CategorySums {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (category, value) in &self.entries {
            map.serialize_entry(category, value)?;
        }
        map.end()
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One counted module occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditMatch {
    pub module: String,
    pub category: String,
    pub credits: f64,
    pub source: String,
}

impl CreditMatch {
    /// `"<name> -> <category>:<value> | <source>"`.
    pub fn evidence(&self) -> String {
        format!(
            "{} -> {}:{:?} | {}",
            self.module, self.category, self.credits, self.source
        )
    }
}

/// Per-strategy accumulator for one sweep combination.
///
/// A (module, category, value) triple is counted once.
#[derive(Debug, Clone)]
pub struct CreditTally {
    sums: CategorySums,
    matches: Vec<CreditMatch>,
    unrecognized: Vec<String>,
    seen: HashSet<(String, String, u64)>,
}

impl CreditTally {
    pub fn new(categories: &[String]) -> Self {
        Self {
            sums: CategorySums::new(categories),
            matches: Vec::new(),
            unrecognized: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Whether matches of `module` count toward a requested category.
    pub fn accepts(&self, module: &ModuleDefinition) -> bool {
        self.sums.contains(&module.category)
    }

    /// Count `module` at `credits` for the row `source`. Returns false when the
    /// category was not requested, the value is not positive, or the triple
    /// was already counted.
    pub fn record(&mut self, module: &ModuleDefinition, credits: f64, source: &str) -> bool {
        if !self.accepts(module) || !(credits > 0.0) {
            return false;
        }
        let key = (module.name.clone(), module.category.clone(), credits.to_bits());
        if !self.seen.insert(key) {
            return false;
        }
        self.sums.add(&module.category, credits);
        self.matches.push(CreditMatch {
            module: module.name.clone(),
            category: module.category.clone(),
            credits,
            source: source.to_string(),
        });
        true
    }

    /// Remember a matched line whose credit value could not be read.
    pub fn note_unrecognized(&mut self, source: &str) {
        if !self.unrecognized.iter().any(|s| s == source) {
            self.unrecognized.push(source.to_string());
        }
    }

    pub fn unrecognized(&self) -> &[String] {
        &self.unrecognized
    }

    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.sums.total()
    }

    pub fn sums(&self) -> &CategorySums {
        &self.sums
    }

    pub fn matches(&self) -> &[CreditMatch] {
        &self.matches
    }

    pub fn into_parts(self) -> (CategorySums, Vec<CreditMatch>, Vec<String>) {
        (self.sums, self.matches, self.unrecognized)
    }
}
