//! Search engine handle.
//!
//! The service talks to the engine through [`SearchEngine`], owned by
//! [`crate::state::AppState`] as an `Arc<dyn SearchEngine>`. The engine owns
//! consistency for its index, so no application-level locking is done here.

pub mod local;
pub mod opensearch;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::Result;
use crate::models::{Product, SearchResult, Suggestion};

/// Result of a bulk write. Positions refer to the submitted batch.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BulkOutcome {
    pub indexed: usize,
    pub ids: Vec<String>,
    pub failures: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BulkFailure {
    pub index: usize,
    pub reason: String,
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Short name for logs and `/health`.
    fn name(&self) -> &'static str;

    /// Create the product index with its mappings if it does not exist.
    async fn ensure_index(&self) -> Result<()>;

    /// Drop the index and create it again with the current mappings.
    async fn recreate_index(&self) -> Result<()>;

    /// Index one product and return its engine-assigned id.
    async fn index_product(&self, product: &Product) -> Result<String>;

    /// Index a batch, reporting per-item failures instead of dropping them.
    async fn bulk_index(&self, products: &[Product]) -> Result<BulkOutcome>;

    /// Multi-field search with fuzziness.
    async fn search(&self, query: &str, size: usize) -> Result<Vec<SearchResult>>;

    /// Low-latency prefix-oriented search on name and brand.
    async fn instant_search(&self, query: &str, size: usize) -> Result<Vec<SearchResult>>;

    /// Prefix suggestions for the search box.
    async fn autocomplete(&self, query: &str, size: usize) -> Result<Vec<Suggestion>>;

    /// Cheap reachability probe.
    async fn health(&self) -> Result<()>;
}

/// Maximum length of an indexed prefix token (edge n-gram max_gram).
pub const MAX_PREFIX_LEN: usize = 20;

/// Completion inputs for a product name: the full name, then each word.
pub fn suggest_inputs(name: &str) -> Vec<String> {
    let name = name.trim();
    if name.is_empty() {
        return Vec::new();
    }
    let mut inputs = vec![name.to_string()];
    inputs.extend(name.split_whitespace().map(str::to_string));
    inputs.dedup();
    inputs
}

/// Merge completion-suggester options and prefix hits into a deduplicated
/// list. Suggester options come first; hits are only used to fill up and
/// only when their name starts with the query.
pub fn merge_suggestions(
    completions: Vec<Suggestion>,
    hits: Vec<Suggestion>,
    query: &str,
    size: usize,
) -> Vec<Suggestion> {
    let query_lower = query.trim().to_lowercase();
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(size);

    let prefix_hits = hits
        .into_iter()
        .filter(|s| s.text.to_lowercase().starts_with(&query_lower));

    for suggestion in completions.into_iter().chain(prefix_hits) {
        if merged.len() >= size {
            break;
        }
        if suggestion.text.trim().is_empty() {
            continue;
        }
        if seen.insert(suggestion.text.to_lowercase()) {
            merged.push(suggestion);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SuggestionKind;

    fn sugg(text: &str, kind: SuggestionKind) -> Suggestion {
        Suggestion {
            text: text.to_string(),
            kind,
            score: 1.0,
        }
    }

    #[test]
    fn test_suggest_inputs_full_name_then_words() {
        assert_eq!(
            suggest_inputs("iPhone 15 Pro"),
            vec!["iPhone 15 Pro", "iPhone", "15", "Pro"]
        );
        assert!(suggest_inputs("   ").is_empty());
    }

    #[test]
    fn test_suggest_inputs_single_word_not_duplicated() {
        assert_eq!(suggest_inputs("Laptop"), vec!["Laptop"]);
    }

    #[test]
    fn test_merge_prefers_completions_and_dedupes() {
        let completions = vec![
            sugg("Laptop Pro", SuggestionKind::Product),
            sugg("laptop pro", SuggestionKind::Product),
        ];
        let hits = vec![
            sugg("Laptop Air", SuggestionKind::SearchResult),
            sugg("Gaming Laptop", SuggestionKind::SearchResult),
        ];
        let merged = merge_suggestions(completions, hits, "lap", 5);
        let texts: Vec<&str> = merged.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Laptop Pro", "Laptop Air"]);
        assert_eq!(merged[0].kind, SuggestionKind::Product);
    }

    #[test]
    fn test_merge_respects_size() {
        let hits = (0..10)
            .map(|i| sugg(&format!("Lamp {i}"), SuggestionKind::SearchResult))
            .collect();
        assert_eq!(merge_suggestions(Vec::new(), hits, "lam", 3).len(), 3);
    }
}
