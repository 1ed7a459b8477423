//! Process-lifetime OCR cache.
//!
//! Keyed by (content hash, dpi, page segmentation mode, page limit, depth) so
//! a first-page preview never shadows a full-document pass and a text-only
//! pass never stands in for one with word boxes. Entries are never
//! evicted. Recognition is deterministic for identical inputs, so concurrent
//! writers to the same key resolve last-writer-wins.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use base64::Engine;
use sha2::{Digest, Sha256};

use super::types::{PageRecognition, PageSegMode};

/// SHA-256 content hash of raw document bytes.
pub fn compute_content_hash(content: &[u8]) -> String {
    let hash = Sha256::digest(content);
    base64::engine::general_purpose::STANDARD.encode(hash)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OcrCacheKey {
    pub content_hash: String,
    pub dpi: u32,
    pub mode: PageSegMode,
    pub max_pages: Option<usize>,
    /// Entry carries word tokens, not just page text.
    pub tokens: bool,
}

/// Shared cache of recognized pages. Construct once, pass by `Arc`.
#[derive(Debug, Default)]
pub struct OcrCache {
    entries: RwLock<HashMap<OcrCacheKey, Arc<Vec<PageRecognition>>>>,
}

impl OcrCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &OcrCacheKey) -> Option<Arc<Vec<PageRecognition>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: OcrCacheKey, pages: Arc<Vec<PageRecognition>>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, pages);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
