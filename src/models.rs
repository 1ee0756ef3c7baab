use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// A catalogue product as stored in the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock: u64,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub reviews_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub specifications: BTreeMap<String, String>,
}

/// Raw product payload as received over HTTP, before validation.
///
/// Every field is optional so that missing fields are reported as
/// validation errors instead of body rejections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub rating: Option<f64>,
    pub reviews_count: Option<i64>,
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string_map")]
    pub specifications: Option<BTreeMap<String, String>>,
}

/// A ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub id: String,
    #[serde(flatten)]
    pub product: Product,
    pub relevance_score: f32,
}

/// Where an autocomplete suggestion came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    /// Completion suggester entry
    Product,
    /// Prefix hit from the regular query
    SearchResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub score: f32,
}

/// Query string for `/api/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub size: Option<usize>,
    #[serde(default)]
    pub use_groq_rerank: bool,
}

/// Query string for `/api/instant-search` and `/api/autocomplete`.
#[derive(Debug, Clone, Deserialize)]
pub struct QuickSearchParams {
    #[serde(default)]
    pub q: String,
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchParams {
    pub top_k: Option<usize>,
}

pub const DEFAULT_SEARCH_SIZE: usize = 10;
pub const DEFAULT_AUTOCOMPLETE_SIZE: usize = 5;
pub const DEFAULT_MATCH_TOP_K: usize = 5;
pub const MAX_RESULT_SIZE: usize = 50;

/// Clamp a caller-supplied result size into `1..=MAX_RESULT_SIZE`.
pub fn clamp_size(size: Option<usize>, default: usize) -> usize {
    size.unwrap_or(default).clamp(1, MAX_RESULT_SIZE)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: String,
    pub query: String,
    pub reranked: bool,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutocompleteResponse {
    pub status: String,
    pub query: String,
    pub suggestions: Vec<Suggestion>,
}

/// A structured product request, extracted from an email or posted directly
/// to `/api/match`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRequest {
    pub product_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub specifications: BTreeMap<String, String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_quantity() -> u32 {
    1
}

fn default_priority() -> String {
    "normal".to_string()
}

impl ProductRequest {
    /// Free text used to retrieve candidates for this request.
    pub fn query_text(&self) -> String {
        let mut parts = vec![self.product_name.trim().to_string()];
        if !self.description.trim().is_empty() {
            parts.push(self.description.trim().to_string());
        }
        for value in self.specifications.values() {
            if !value.trim().is_empty() {
                parts.push(value.trim().to_string());
            }
        }
        parts.join(" ")
    }
}

/// Product fields extracted from an image by the vision model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedProduct {
    pub product_name: String,
    pub description: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub specifications: BTreeMap<String, String>,
    #[serde(default)]
    pub estimated_price_range: String,
}

/// A message pulled from the mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// One extracted request together with the products it matched.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedRequest {
    pub sender: String,
    pub subject: String,
    pub request: ProductRequest,
    pub matches: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailCheckResponse {
    pub status: String,
    pub new_emails: usize,
    pub failed_emails: usize,
    pub processed_requests: Vec<ProcessedRequest>,
}

/// Accept any JSON object as a string map, stringifying non-string values.
fn lenient_string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(stringify_values).unwrap_or_default())
}

fn lenient_opt_string_map<'de, D>(
    deserializer: D,
) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(stringify_values))
}

fn stringify_values(map: BTreeMap<String, serde_json::Value>) -> BTreeMap<String, String> {
    map.into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect()
}
