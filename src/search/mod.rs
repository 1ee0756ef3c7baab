//! Search Client: the three query modes over one engine handle, with a
//! short-lived result cache and optional LLM reranking.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{QueryCache, QueryKey, QueryMode, CACHE_MAX_ENTRIES};
use crate::config::{Config, LlmConfig};
use crate::engine::SearchEngine;
use crate::error::{AppError, Result};
use crate::llm::rerank::{rerank, RerankTarget};
use crate::models::{SearchResult, Suggestion};

/// Hits plus whether the model ordering was applied.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub reranked: bool,
}

#[derive(Clone)]
pub struct SearchClient {
    engine: Arc<dyn SearchEngine>,
    http_client: reqwest::Client,
    llm: Arc<LlmConfig>,
    results: QueryCache<QueryKey, SearchOutcome>,
    suggestions: QueryCache<QueryKey, Vec<Suggestion>>,
}

impl SearchClient {
    pub fn new(engine: Arc<dyn SearchEngine>, http_client: reqwest::Client, config: &Config) -> Self {
        Self {
            engine,
            http_client,
            llm: Arc::new(config.llm.clone()),
            results: QueryCache::new(
                CACHE_MAX_ENTRIES,
                Duration::from_secs(config.search_cache_ttl_secs.max(1)),
            ),
            suggestions: QueryCache::new(
                CACHE_MAX_ENTRIES,
                Duration::from_secs(config.autocomplete_cache_ttl_secs.max(1)),
            ),
        }
    }

    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    /// Full multi-field search, optionally reordered by the language model.
    pub async fn search(&self, query: &str, size: usize, use_rerank: bool) -> Result<SearchOutcome> {
        let query = validate_query(query)?;
        let key = QueryKey::new(QueryMode::Full, query, size, use_rerank);
        if let Some(hit) = self.results.get(&key).await {
            tracing::debug!(query, "Search cache hit");
            return Ok(hit);
        }

        let generation = self.results.generation();
        let hits = self.engine.search(query, size).await?;
        tracing::debug!(query, hits = hits.len(), "Full search");

        let outcome = if use_rerank {
            self.rerank_or_keep(RerankTarget::Query(query), hits, size).await
        } else {
            SearchOutcome {
                results: hits,
                reranked: false,
            }
        };

        // A rerank that fell back is not cached under the rerank key.
        if outcome.reranked || !use_rerank {
            self.results.insert_if_current(key, outcome.clone(), generation).await;
        }
        Ok(outcome)
    }

    /// Prefix-oriented low-latency search.
    pub async fn instant_search(&self, query: &str, size: usize) -> Result<Vec<SearchResult>> {
        let query = validate_query(query)?;
        let key = QueryKey::new(QueryMode::Instant, query, size, false);
        if let Some(hit) = self.results.get(&key).await {
            return Ok(hit.results);
        }

        let generation = self.results.generation();
        let hits = self.engine.instant_search(query, size).await?;
        self.results
            .insert_if_current(
                key,
                SearchOutcome {
                    results: hits.clone(),
                    reranked: false,
                },
                generation,
            )
            .await;
        Ok(hits)
    }

    pub async fn autocomplete(&self, query: &str, size: usize) -> Result<Vec<Suggestion>> {
        let query = validate_query(query)?;
        let key = QueryKey::new(QueryMode::Autocomplete, query, size, false);
        if let Some(hit) = self.suggestions.get(&key).await {
            return Ok(hit);
        }

        let generation = self.suggestions.generation();
        let suggestions = self.engine.autocomplete(query, size).await?;
        self.suggestions
            .insert_if_current(key, suggestions.clone(), generation)
            .await;
        Ok(suggestions)
    }

    /// Rerank `hits` against `target`. If the reranker cannot run at all the
    /// hits are returned untouched, truncated to `size`.
    pub async fn rerank_or_keep(
        &self,
        target: RerankTarget<'_>,
        mut hits: Vec<SearchResult>,
        size: usize,
    ) -> SearchOutcome {
        // Reranking failures fall back to engine order; they never fail the request.
        match rerank(&self.http_client, &self.llm, target, hits.clone(), size).await {
            Ok(results) => SearchOutcome {
                results,
                reranked: true,
            },
            Err(e) => {
                tracing::warn!("Rerank unavailable, keeping engine order: {e:#}");
                hits.truncate(size);
                SearchOutcome {
                    results: hits,
                    reranked: false,
                }
            }
        }
    }

    /// Forget every cached result. Called after writes to the index.
    pub fn invalidate_cache(&self) {
        self.results.invalidate_all();
        self.suggestions.invalidate_all();
    }
}

fn validate_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Query must not be empty".to_string()));
    }
    Ok(trimmed)
}
