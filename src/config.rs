//! Application constants and the per-program evaluation configuration.
//!
//! A program configuration is a TOML file naming the evaluation track, the
//! module-name → category mapping, the credit requirements per category and
//! the OCR tuning knobs:
//!
//! ```toml
//! track = "bwl"
//! max_grade = 2.4
//!
//! [[requirements]]
//! category = "BWL"
//! min_credits = 60.0
//!
//! [modules]
//! "betriebswirtschaftslehre" = "BWL"
//!
//! [ocr]
//! languages = "deu+eng"
//! dpis = [200, 300]
//! modes = [4, 6]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::models::ProgramTrack;
use crate::pipeline::extraction::types::PageSegMode;
use crate::pipeline::matching::ModuleMapping;

/// Application-level constants
pub const APP_NAME: &str = "Credcheck";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default Tesseract language bundle (German transcripts with English fallback).
pub const DEFAULT_OCR_LANGUAGES: &str = "deu+eng";

/// Per-page OCR call timeout; a hung call leaves that page empty.
pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 60;

/// Whole-document extraction timeout.
pub const DEFAULT_DOCUMENT_TIMEOUT_SECS: u64 = 60;

/// Documents extracted concurrently. Each one fans out over page threads.
pub const DEFAULT_MAX_CONCURRENT_DOCUMENTS: usize = 3;

/// Resolutions swept by the credit extractor.
pub const DEFAULT_SWEEP_DPIS: [u32; 2] = [200, 300];

/// Default log filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "credcheck=info,credcheck_lib=info"
}

/// Page-level OCR threads: 90% of the available CPUs, at least one.
pub fn default_ocr_threads() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    ((cpus as f64 * 0.9) as usize).max(1)
}

/// Default tessdata directory, overridable with `TESSDATA_PREFIX`.
pub fn default_tessdata_dir() -> PathBuf {
    std::env::var_os("TESSDATA_PREFIX")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/usr/share/tesseract-ocr/5/tessdata"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Minimum credits for one category.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CreditRequirement {
    pub category: String,
    pub min_credits: f64,
}

/// OCR tuning section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrSection {
    pub languages: String,
    pub threads: usize,
    pub tessdata_dir: Option<PathBuf>,
    /// Per-page OCR call limit; 0 disables the limit.
    pub page_timeout_secs: u64,
    pub document_timeout_secs: u64,
    pub max_concurrent_documents: usize,
    pub dpis: Vec<u32>,
    pub modes: Vec<PageSegMode>,
}

impl Default for OcrSection {
    fn default() -> Self {
        Self {
            languages: DEFAULT_OCR_LANGUAGES.to_string(),
            threads: default_ocr_threads(),
            tessdata_dir: None,
            page_timeout_secs: DEFAULT_PAGE_TIMEOUT_SECS,
            document_timeout_secs: DEFAULT_DOCUMENT_TIMEOUT_SECS,
            max_concurrent_documents: DEFAULT_MAX_CONCURRENT_DOCUMENTS,
            dpis: DEFAULT_SWEEP_DPIS.to_vec(),
            modes: vec![PageSegMode::SINGLE_COLUMN, PageSegMode::SINGLE_BLOCK],
        }
    }
}

impl OcrSection {
    pub fn page_timeout(&self) -> Option<Duration> {
        (self.page_timeout_secs > 0).then(|| Duration::from_secs(self.page_timeout_secs))
    }

    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }

    pub fn tessdata_dir(&self) -> PathBuf {
        self.tessdata_dir.clone().unwrap_or_else(default_tessdata_dir)
    }
}

/// Evaluation settings for one study program.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgramConfig {
    pub track: ProgramTrack,
    #[serde(default = "default_max_grade")]
    pub max_grade: f64,
    #[serde(default)]
    pub requirements: Vec<CreditRequirement>,
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
    #[serde(default)]
    pub ocr: OcrSection,
}

fn default_max_grade() -> f64 {
    2.4
}

impl ProgramConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            track = %config.track,
            modules = config.modules.len(),
            requirements = config.requirements.len(),
            "Program configuration loaded"
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ocr.dpis.is_empty() || self.ocr.dpis.contains(&0) {
            return Err(ConfigError::Invalid(
                "ocr.dpis must list at least one positive resolution".into(),
            ));
        }
        if self.ocr.modes.is_empty() {
            return Err(ConfigError::Invalid(
                "ocr.modes must list at least one page segmentation mode".into(),
            ));
        }
        if self.ocr.max_concurrent_documents == 0 {
            return Err(ConfigError::Invalid(
                "ocr.max_concurrent_documents must be at least 1".into(),
            ));
        }
        for req in &self.requirements {
            if req.category.trim().is_empty() {
                return Err(ConfigError::Invalid("requirement with empty category".into()));
            }
            if !req.min_credits.is_finite() || req.min_credits < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "requirement {} has invalid min_credits {}",
                    req.category, req.min_credits
                )));
            }
        }
        Ok(())
    }

    /// Requested categories in configuration order.
    pub fn categories(&self) -> Vec<String> {
        self.requirements.iter().map(|r| r.category.clone()).collect()
    }

    pub fn module_mapping(&self) -> ModuleMapping {
        ModuleMapping::from_pairs(self.modules.iter())
    }
}
