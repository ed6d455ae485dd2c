//! Source key resolution
//!
//! Items are grouped by the first non-empty key from an ordered list of
//! extractors: source tag, category, link domain, author, then `"unknown"`.

use crate::models::Item;
use crate::utils::extract_domain;

/// Key used when no extractor yields a value
pub const UNKNOWN_SOURCE: &str = "unknown";

pub type KeyExtractor = fn(&Item) -> Option<String>;

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn by_source_tag(item: &Item) -> Option<String> {
    non_empty(&item.source_id)
}

pub fn by_category(item: &Item) -> Option<String> {
    item.category.as_deref().and_then(non_empty)
}

pub fn by_domain(item: &Item) -> Option<String> {
    extract_domain(&item.link).ok()
}

pub fn by_author(item: &Item) -> Option<String> {
    item.author.as_deref().and_then(non_empty)
}

/// Ordered extractor chain
#[derive(Debug, Clone)]
pub struct SourceKeyChain {
    extractors: Vec<(&'static str, KeyExtractor)>,
}

impl Default for SourceKeyChain {
    fn default() -> Self {
        Self {
            extractors: vec![
                ("source", by_source_tag as KeyExtractor),
                ("category", by_category),
                ("domain", by_domain),
                ("author", by_author),
            ],
        }
    }
}

impl SourceKeyChain {
    /// Chain with no extractors; every item maps to `"unknown"`
    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    pub fn then(mut self, name: &'static str, extractor: KeyExtractor) -> Self {
        self.extractors.push((name, extractor));
        self
    }

    /// Key plus the name of the extractor that produced it
    pub fn resolve(&self, item: &Item) -> (&'static str, String) {
        self.extractors
            .iter()
            .find_map(|(name, extract)| extract(item).map(|key| (*name, key)))
            .unwrap_or(("fallback", UNKNOWN_SOURCE.to_string()))
    }

    pub fn key_for(&self, item: &Item) -> String {
        self.resolve(item).1
    }
}
