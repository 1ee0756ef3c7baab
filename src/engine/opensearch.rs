//! REST client for an external OpenSearch/Elasticsearch cluster.
//!
//! Field mappings:
//! - `name`, `description`: `search_as_you_type` with a `.standard` text
//!   subfield and an `.autocomplete` subfield (edge n-gram 1..20 at index
//!   time, standard tokenizer at query time)
//! - `name_suggest`, `category_suggest`: completion fields
//! - `category`, `brand`: keyword

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::{merge_suggestions, suggest_inputs, BulkFailure, BulkOutcome, SearchEngine};
use crate::error::{AppError, Result};
use crate::models::{Product, SearchResult, Suggestion, SuggestionKind};

pub struct OpenSearchEngine {
    client: reqwest::Client,
    base_url: String,
    index: String,
    index_ready: AtomicBool,
}

impl OpenSearchEngine {
    pub fn new(client: reqwest::Client, base_url: &str, index: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            index_ready: AtomicBool::new(false),
        }
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, self.index)
    }

    async fn run_search(&self, body: &Value) -> Result<SearchBody> {
        let resp = self
            .client
            .post(format!("{}/_search", self.index_url()))
            .json(body)
            .send()
            .await
            .map_err(unreachable)?;
        let resp = check_status(resp, "search").await?;
        resp.json::<SearchBody>()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse search response: {e}")))
    }

    async fn create_index(&self) -> Result<()> {
        let resp = self
            .client
            .put(self.index_url())
            .json(&index_definition())
            .send()
            .await
            .map_err(unreachable)?;

        if resp.status().as_u16() == 400 {
            let body = resp.text().await.unwrap_or_default();
            // Another replica created it first.
            if body.contains("resource_already_exists_exception") {
                return Ok(());
            }
            return Err(AppError::Internal(format!(
                "Failed to create index '{}': {body}",
                self.index
            )));
        }

        check_status(resp, "create index").await?;
        tracing::info!("Created search index '{}'", self.index);
        Ok(())
    }
}

#[async_trait]
impl SearchEngine for OpenSearchEngine {
    fn name(&self) -> &'static str {
        "opensearch"
    }

    async fn ensure_index(&self) -> Result<()> {
        if self.index_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let resp = self
            .client
            .head(self.index_url())
            .send()
            .await
            .map_err(unreachable)?;

        match resp.status().as_u16() {
            200 => {}
            404 => self.create_index().await?,
            _ => {
                check_status(resp, "index exists").await?;
            }
        }

        self.index_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn recreate_index(&self) -> Result<()> {
        let resp = self
            .client
            .delete(self.index_url())
            .send()
            .await
            .map_err(unreachable)?;
        if resp.status().as_u16() != 404 {
            check_status(resp, "delete index").await?;
        }

        self.index_ready.store(false, Ordering::Release);
        self.ensure_index().await
    }

    async fn index_product(&self, product: &Product) -> Result<String> {
        self.ensure_index().await?;

        let resp = self
            .client
            .post(format!("{}/_doc", self.index_url()))
            .json(&engine_document(product)?)
            .send()
            .await
            .map_err(unreachable)?;
        let resp = check_status(resp, "index product").await?;

        let body: IndexBody = resp
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse index response: {e}")))?;
        Ok(body.id)
    }

    async fn bulk_index(&self, products: &[Product]) -> Result<BulkOutcome> {
        if products.is_empty() {
            return Ok(BulkOutcome::default());
        }
        self.ensure_index().await?;

        let payload = bulk_payload(&self.index, products)?;
        let resp = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await
            .map_err(unreachable)?;
        let resp = check_status(resp, "bulk index").await?;

        let body: BulkBody = resp
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse bulk response: {e}")))?;
        Ok(bulk_outcome(body, products.len()))
    }

    async fn search(&self, query: &str, size: usize) -> Result<Vec<SearchResult>> {
        self.ensure_index().await?;
        let body = self.run_search(&full_search_query(query, size)).await?;
        Ok(body.into_results())
    }

    async fn instant_search(&self, query: &str, size: usize) -> Result<Vec<SearchResult>> {
        self.ensure_index().await?;
        match self.run_search(&instant_search_query(query, size)).await {
            Ok(body) => Ok(body.into_results()),
            Err(AppError::ServiceUnavailable(e)) => Err(AppError::ServiceUnavailable(e)),
            Err(e) => {
                tracing::debug!("Instant search failed ({e}), retrying with basic match");
                let body = self.run_search(&instant_fallback_query(query, size)).await?;
                Ok(body.into_results())
            }
        }
    }

    async fn autocomplete(&self, query: &str, size: usize) -> Result<Vec<Suggestion>> {
        self.ensure_index().await?;
        let body = self.run_search(&autocomplete_query(query, size)).await?;

        let completions: Vec<Suggestion> = body
            .suggest
            .as_ref()
            .and_then(|s| s.get("product_suggestions"))
            .map(|entries| {
                entries
                    .iter()
                    .flat_map(|entry| entry.options.iter())
                    .map(|opt| Suggestion {
                        text: opt.text.clone(),
                        kind: SuggestionKind::Product,
                        score: opt.score.unwrap_or(100.0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let hits: Vec<Suggestion> = body
            .hits
            .hits
            .into_iter()
            .map(|hit| Suggestion {
                text: hit.source.name,
                kind: SuggestionKind::SearchResult,
                score: hit.score.unwrap_or(50.0),
            })
            .collect();

        Ok(merge_suggestions(completions, hits, query, size))
    }

    async fn health(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/_cluster/health", self.base_url))
            .send()
            .await
            .map_err(unreachable)?;
        check_status(resp, "cluster health").await?;
        Ok(())
    }
}

fn unreachable(err: reqwest::Error) -> AppError {
    AppError::ServiceUnavailable(format!("Search engine unreachable: {err}"))
}

async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = format!("Engine {what} returned {status}: {body}");
    Err(match status.as_u16() {
        401 | 403 => AppError::Authentication(message),
        429 | 500..=599 => AppError::ServiceUnavailable(message),
        _ => AppError::Internal(message),
    })
}

/// Product source plus completion inputs.
fn engine_document(product: &Product) -> Result<Value> {
    let mut doc = serde_json::to_value(product)
        .map_err(|e| AppError::Internal(format!("Failed to serialize product: {e}")))?;

    if let Value::Object(map) = &mut doc {
        let inputs = suggest_inputs(&product.name);
        if !inputs.is_empty() {
            map.insert("name_suggest".into(), json!({ "input": inputs, "weight": 10 }));
        }
        if !product.category.trim().is_empty() {
            map.insert(
                "category_suggest".into(),
                json!({ "input": [product.category], "weight": 5 }),
            );
        }
    }
    Ok(doc)
}

fn bulk_payload(index: &str, products: &[Product]) -> Result<String> {
    let action = json!({ "index": { "_index": index } }).to_string();
    let mut payload = String::new();
    for product in products {
        payload.push_str(&action);
        payload.push('\n');
        payload.push_str(&engine_document(product)?.to_string());
        payload.push('\n');
    }
    Ok(payload)
}

/// Per-document results for a bulk request of `sent` documents. Documents
/// the response has no item for count as failed.
fn bulk_outcome(body: BulkBody, sent: usize) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    let returned = body.items.len();
    for (position, item) in body.items.into_iter().enumerate() {
        let Some(result) = item.into_values().next() else {
            outcome.failures.push(BulkFailure {
                index: position,
                reason: "empty bulk item".to_string(),
            });
            continue;
        };
        let ok = result.is_success();
        let status = result.status;
        match (ok, result.error.filter(|e| !e.is_null())) {
            (_, Some(error)) => {
                let reason = error
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                outcome.failures.push(BulkFailure {
                    index: position,
                    reason,
                });
            }
            (false, None) => outcome.failures.push(BulkFailure {
                index: position,
                reason: format!("status {status}"),
            }),
            (true, None) => {
                outcome.indexed += 1;
                outcome.ids.extend(result.id);
            }
        }
    }
    if returned < sent {
        tracing::warn!(sent, returned, "Bulk response is missing items");
        outcome.failures.extend((returned..sent).map(|index| BulkFailure {
            index,
            reason: "no result returned for this document".to_string(),
        }));
    }
    if body.errors && outcome.failures.is_empty() {
        tracing::warn!("Bulk response flagged errors but no failed item was found");
    }
    outcome
}

fn full_search_query(query: &str, size: usize) -> Value {
    json!({
        "query": {
            "bool": {
                "should": [
                    {
                        "multi_match": {
                            "query": query,
                            "type": "bool_prefix",
                            "fields": ["name", "name._2gram", "name._3gram"],
                            "boost": 3
                        }
                    },
                    {
                        "multi_match": {
                            "query": query,
                            "type": "bool_prefix",
                            "fields": ["description", "description._2gram", "description._3gram"],
                            "boost": 2
                        }
                    },
                    {
                        "multi_match": {
                            "query": query,
                            "fields": ["name.standard^4", "description.standard^2", "brand^2", "category^1"],
                            "type": "best_fields",
                            "fuzziness": "AUTO",
                            "tie_breaker": 0.3
                        }
                    },
                    {
                        "match": {
                            "name.autocomplete": { "query": query, "boost": 2 }
                        }
                    }
                ],
                "minimum_should_match": 1
            }
        },
        "size": size
    })
}

const INSTANT_SOURCE: [&str; 10] = [
    "name",
    "brand",
    "category",
    "price",
    "stock",
    "rating",
    "reviews_count",
    "image_url",
    "description",
    "specifications",
];

fn instant_search_query(query: &str, size: usize) -> Value {
    json!({
        "query": {
            "bool": {
                "should": [
                    { "match_phrase_prefix": { "name": { "query": query, "max_expansions": 5 } } },
                    { "match": { "name": { "query": query, "boost": 2 } } },
                    { "match": { "brand": { "query": query, "boost": 1.5 } } }
                ],
                "minimum_should_match": 1
            }
        },
        "_source": INSTANT_SOURCE,
        "size": size,
        "timeout": "50ms"
    })
}

fn instant_fallback_query(query: &str, size: usize) -> Value {
    json!({
        "query": { "match": { "name": query } },
        "_source": INSTANT_SOURCE,
        "size": size,
        "timeout": "20ms"
    })
}

fn autocomplete_query(query: &str, size: usize) -> Value {
    json!({
        "suggest": {
            "product_suggestions": {
                "prefix": query,
                "completion": {
                    "field": "name_suggest",
                    "size": size,
                    "skip_duplicates": true
                }
            }
        },
        "query": {
            "match_phrase_prefix": { "name": { "query": query, "max_expansions": 3 } }
        },
        "_source": ["name", "category", "brand"],
        "size": size,
        "timeout": "30ms"
    })
}

fn index_definition() -> Value {
    let text_with_subfields = json!({
        "type": "search_as_you_type",
        "analyzer": "search_as_you_type_analyzer",
        "fields": {
            "standard": { "type": "text", "analyzer": "standard" },
            "autocomplete": {
                "type": "text",
                "analyzer": "autocomplete_index",
                "search_analyzer": "autocomplete_search"
            }
        }
    });

    json!({
        "settings": {
            "analysis": {
                "tokenizer": {
                    "autocomplete_tokenizer": {
                        "type": "edge_ngram",
                        "min_gram": 1,
                        "max_gram": crate::engine::MAX_PREFIX_LEN,
                        "token_chars": ["letter", "digit"]
                    }
                },
                "analyzer": {
                    "autocomplete_index": {
                        "type": "custom",
                        "tokenizer": "autocomplete_tokenizer",
                        "filter": ["lowercase"]
                    },
                    "autocomplete_search": {
                        "type": "custom",
                        "tokenizer": "standard",
                        "filter": ["lowercase"]
                    },
                    "search_as_you_type_analyzer": {
                        "type": "custom",
                        "tokenizer": "standard",
                        "filter": ["lowercase", "stop", "snowball"]
                    }
                }
            }
        },
        "mappings": {
            "properties": {
                "name": text_with_subfields.clone(),
                "name_suggest": {
                    "type": "completion",
                    "analyzer": "simple",
                    "preserve_separators": true,
                    "preserve_position_increments": true,
                    "max_input_length": 50
                },
                "description": text_with_subfields,
                "category": { "type": "keyword" },
                "category_suggest": { "type": "completion", "analyzer": "simple" },
                "specifications": { "type": "object" },
                "price": { "type": "float" },
                "stock": { "type": "integer" },
                "image_url": { "type": "keyword", "index": false },
                "brand": { "type": "keyword" },
                "rating": { "type": "float" },
                "reviews_count": { "type": "integer" }
            }
        }
    })
}

// ─── Response types ────────────────────────────────────

#[derive(Deserialize)]
struct IndexBody {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Deserialize)]
struct SearchBody {
    hits: HitsEnvelope,
    #[serde(default)]
    suggest: Option<HashMap<String, Vec<SuggestEntry>>>,
}

impl SearchBody {
    fn into_results(self) -> Vec<SearchResult> {
        self.hits
            .hits
            .into_iter()
            .map(|hit| SearchResult {
                id: hit.id,
                product: hit.source,
                relevance_score: hit.score.unwrap_or(0.0).max(0.0),
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source")]
    source: Product,
}

#[derive(Deserialize)]
struct SuggestEntry {
    #[serde(default)]
    options: Vec<SuggestOption>,
}

#[derive(Deserialize)]
struct SuggestOption {
    text: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
}

#[derive(Deserialize)]
struct BulkBody {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItemResult>>,
}

#[derive(Deserialize)]
struct BulkItemResult {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    error: Option<Value>,
}

impl BulkItemResult {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
