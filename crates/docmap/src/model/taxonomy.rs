//! Taxonomy codes that mappings point into.

use serde::{Deserialize, Serialize};

/// Two-level code in the target document's taxonomy (category plus sub-item).
///
/// Codes are passed through as supplied by the classifier; whether a code
/// exists in the target's taxonomy is for the target document to decide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaxonomyCode {
    /// Top-level category (e.g. "GRI 2").
    pub category: String,
    /// Item within the category (e.g. "2-7").
    pub item: String,
}

impl TaxonomyCode {
    pub fn new(category: &str, item: &str) -> Self {
        Self {
            category: category.trim().to_string(),
            item: item.trim().to_string(),
        }
    }

    /// Same code with surrounding whitespace removed from both levels.
    ///
    /// Codes decoded from callbacks bypass `new`, so they are normalized here.
    pub fn normalized(&self) -> Self {
        Self::new(&self.category, &self.item)
    }

    /// Returns true when either level is blank.
    pub fn is_blank(&self) -> bool {
        self.category.trim().is_empty() || self.item.trim().is_empty()
    }
}

impl std::fmt::Display for TaxonomyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.item)
    }
}
