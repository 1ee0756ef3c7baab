use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Term};
use uuid::Uuid;

use crate::engine::{merge_suggestions, suggest_inputs, BulkOutcome, SearchEngine, MAX_PREFIX_LEN};
use crate::error::{AppError, Result};
use crate::models::{Product, SearchResult, Suggestion, SuggestionKind};

/// Embedded product index built on tantivy.
///
/// Mirrors the external engine's mapping closely enough to serve the same
/// three query modes: BM25 text fields for full search, and an edge n-gram
/// style `name_prefix` field (every 1..=20 char prefix of every name word,
/// lowercased) for instant search and autocomplete.
pub struct ProductIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    f_id: Field,
    f_name: Field,
    f_name_prefix: Field,
    f_description: Field,
    f_category: Field,
    f_brand: Field,
    f_spec_values: Field,
    f_specifications: Field,
    f_price: Field,
    f_stock: Field,
    f_rating: Field,
    f_reviews_count: Field,
    f_image_url: Field,
}

fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("id", STRING | STORED);
    schema_builder.add_text_field("name", TEXT | STORED);
    schema_builder.add_text_field("name_prefix", STRING);
    schema_builder.add_text_field("description", TEXT | STORED);
    schema_builder.add_text_field("category", TEXT | STORED);
    schema_builder.add_text_field("brand", TEXT | STORED);
    schema_builder.add_text_field("spec_values", TEXT);
    schema_builder.add_text_field("specifications", STORED);
    schema_builder.add_f64_field("price", STORED);
    schema_builder.add_u64_field("stock", STORED);
    schema_builder.add_f64_field("rating", STORED);
    schema_builder.add_u64_field("reviews_count", STORED);
    schema_builder.add_text_field("image_url", STORED);
    schema_builder.build()
}

impl ProductIndex {
    /// Create or open an index at the given directory.
    pub fn open_or_create(index_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(index_dir)?;

        let index = if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir).context("Failed to open existing tantivy index")?
        } else {
            Index::create_in_dir(index_dir, build_schema())
                .context("Failed to create tantivy index")?
        };

        Self::from_index(index)
    }

    /// Index that lives only in memory.
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> anyhow::Result<Self> {
        let schema = index.schema();
        let field = |name: &str| {
            schema
                .get_field(name)
                .with_context(|| format!("Index schema is missing field '{name}'"))
        };

        let writer = index
            .writer_with_num_threads(1, 50_000_000)
            .context("Failed to create index writer")?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        Ok(Self {
            f_id: field("id")?,
            f_name: field("name")?,
            f_name_prefix: field("name_prefix")?,
            f_description: field("description")?,
            f_category: field("category")?,
            f_brand: field("brand")?,
            f_spec_values: field("spec_values")?,
            f_specifications: field("specifications")?,
            f_price: field("price")?,
            f_stock: field("stock")?,
            f_rating: field("rating")?,
            f_reviews_count: field("reviews_count")?,
            f_image_url: field("image_url")?,
            writer: Mutex::new(writer),
            reader,
            index,
        })
    }

    /// Add products in one commit and return their new ids. Either every
    /// product is committed or none is.
    pub fn add_products(&self, products: &[Product]) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::with_capacity(products.len());
        let mut docs = Vec::with_capacity(products.len());
        for product in products {
            let id = Uuid::new_v4().to_string();
            docs.push(self.to_document(&id, product)?);
            ids.push(id);
        }

        let mut writer = self.writer.lock();
        let staged = docs
            .into_iter()
            .try_for_each(|doc| writer.add_document(doc).map(|_| ()))
            .context("Failed to add document")
            .and_then(|()| writer.commit().map(|_| ()).context("Failed to commit index"));
        if let Err(e) = staged {
            writer.rollback().context("Failed to roll back index writer")?;
            return Err(e);
        }
        drop(writer);

        self.reader.reload().context("Failed to reload reader")?;
        Ok(ids)
    }

    /// Delete every document.
    pub fn clear(&self) -> anyhow::Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_all_documents()?;
        writer.commit().context("Failed to commit delete")?;
        drop(writer);
        self.reader.reload().context("Failed to reload reader")?;
        Ok(())
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Full search: boosted BM25 over the text fields, a typo-tolerant pass
    /// on name and brand, and a prefix pass on name words.
    pub fn search(&self, query_str: &str, limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        let tokens = word_tokens(query_str);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let text = tokens.join(" ");

        let mut exact_parser = QueryParser::for_index(
            &self.index,
            vec![
                self.f_name,
                self.f_description,
                self.f_brand,
                self.f_category,
                self.f_spec_values,
            ],
        );
        exact_parser.set_field_boost(self.f_name, 4.0);
        exact_parser.set_field_boost(self.f_description, 2.0);
        exact_parser.set_field_boost(self.f_brand, 2.0);
        let (exact, _) = exact_parser.parse_query_lenient(&text);

        let mut fuzzy_parser = QueryParser::for_index(&self.index, vec![self.f_name, self.f_brand]);
        fuzzy_parser.set_field_fuzzy(self.f_name, false, 1, true);
        fuzzy_parser.set_field_fuzzy(self.f_brand, false, 1, true);
        let (fuzzy, _) = fuzzy_parser.parse_query_lenient(&text);

        let query = BooleanQuery::new(vec![
            (Occur::Should, exact),
            (Occur::Should, Box::new(BoostQuery::new(fuzzy, 0.5)) as Box<dyn Query>),
            (
                Occur::Should,
                Box::new(BoostQuery::new(self.prefix_query(&tokens, Occur::Should), 2.0)),
            ),
        ]);

        self.collect_results(&query, limit)
    }

    /// Instant search: name terms (x2), brand terms (x1.5) and name-word prefixes.
    pub fn instant_search(
        &self,
        query_str: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let tokens = word_tokens(query_str);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let text = tokens.join(" ");

        let (name, _) = QueryParser::for_index(&self.index, vec![self.f_name]).parse_query_lenient(&text);
        let (brand, _) =
            QueryParser::for_index(&self.index, vec![self.f_brand]).parse_query_lenient(&text);

        let query = BooleanQuery::new(vec![
            (Occur::Should, self.prefix_query(&tokens, Occur::Must)),
            (Occur::Should, Box::new(BoostQuery::new(name, 2.0)) as Box<dyn Query>),
            (Occur::Should, Box::new(BoostQuery::new(brand, 1.5))),
        ]);

        self.collect_results(&query, limit)
    }

    /// Autocomplete: products whose name words start with every query token.
    /// Suggest inputs (full name, then each word) that start with the query
    /// act as completion entries; whole names starting with it fill the rest.
    pub fn autocomplete(&self, query_str: &str, size: usize) -> anyhow::Result<Vec<Suggestion>> {
        let tokens = word_tokens(query_str);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let query_lower = query_str.trim().to_lowercase();

        let hits = self.collect_results(&*self.prefix_query(&tokens, Occur::Must), size * 2)?;

        let mut completions = Vec::new();
        let mut names = Vec::new();
        for hit in hits {
            for input in suggest_inputs(&hit.product.name) {
                if input.to_lowercase().starts_with(&query_lower) {
                    completions.push(Suggestion {
                        text: input,
                        kind: SuggestionKind::Product,
                        score: hit.relevance_score,
                    });
                }
            }
            names.push(Suggestion {
                text: hit.product.name,
                kind: SuggestionKind::SearchResult,
                score: hit.relevance_score,
            });
        }

        Ok(merge_suggestions(completions, names, query_str, size))
    }

    fn prefix_query(&self, tokens: &[String], occur: Occur) -> Box<dyn Query> {
        let clauses: Vec<(Occur, Box<dyn Query>)> = tokens
            .iter()
            .map(|token| {
                let prefix: String = token.chars().take(MAX_PREFIX_LEN).collect();
                let term = Term::from_field_text(self.f_name_prefix, &prefix);
                (
                    occur,
                    Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>,
                )
            })
            .collect();
        Box::new(BooleanQuery::new(clauses))
    }

    fn collect_results(&self, query: &dyn Query, limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(query, &TopDocs::with_limit(limit.max(1)))
            .context("Search failed")?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;
            results.push(self.to_result(&doc, score));
        }
        Ok(results)
    }

    fn to_document(&self, id: &str, product: &Product) -> anyhow::Result<TantivyDocument> {
        anyhow::ensure!(
            product.price.is_finite() && product.rating.is_finite(),
            "Product '{}' has a non-finite price or rating",
            product.name
        );
        let mut doc = TantivyDocument::default();
        doc.add_text(self.f_id, id);
        doc.add_text(self.f_name, &product.name);
        for prefix in name_prefixes(&product.name) {
            doc.add_text(self.f_name_prefix, &prefix);
        }
        doc.add_text(self.f_description, &product.description);
        doc.add_text(self.f_category, &product.category);
        if let Some(brand) = &product.brand {
            doc.add_text(self.f_brand, brand);
        }
        if !product.specifications.is_empty() {
            let values: Vec<&str> = product.specifications.values().map(String::as_str).collect();
            doc.add_text(self.f_spec_values, values.join(" "));
            doc.add_text(
                self.f_specifications,
                serde_json::to_string(&product.specifications)?,
            );
        }
        doc.add_f64(self.f_price, product.price);
        doc.add_u64(self.f_stock, product.stock);
        doc.add_f64(self.f_rating, product.rating);
        doc.add_u64(self.f_reviews_count, product.reviews_count);
        if let Some(url) = &product.image_url {
            doc.add_text(self.f_image_url, url);
        }
        Ok(doc)
    }

    fn to_result(&self, doc: &TantivyDocument, score: f32) -> SearchResult {
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let specifications: BTreeMap<String, String> = text(self.f_specifications)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        SearchResult {
            id: text(self.f_id).unwrap_or_default(),
            product: Product {
                name: text(self.f_name).unwrap_or_default(),
                description: text(self.f_description).unwrap_or_default(),
                category: text(self.f_category).unwrap_or_default(),
                brand: text(self.f_brand),
                price: doc.get_first(self.f_price).and_then(|v| v.as_f64()).unwrap_or(0.0),
                stock: doc.get_first(self.f_stock).and_then(|v| v.as_u64()).unwrap_or(0),
                rating: doc.get_first(self.f_rating).and_then(|v| v.as_f64()).unwrap_or(0.0),
                reviews_count: doc
                    .get_first(self.f_reviews_count)
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                image_url: text(self.f_image_url),
                specifications,
            },
            relevance_score: score.max(0.0),
        }
    }
}

/// Lowercased alphanumeric words, the same split the default tokenizer makes.
fn word_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Every 1..=MAX_PREFIX_LEN char prefix of every word.
fn name_prefixes(name: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    for word in word_tokens(name) {
        let chars: Vec<char> = word.chars().collect();
        for len in 1..=chars.len().min(MAX_PREFIX_LEN) {
            prefixes.push(chars[..len].iter().collect());
        }
    }
    prefixes.sort();
    prefixes.dedup();
    prefixes
}

/// [`SearchEngine`] over an embedded [`ProductIndex`]. Index work runs on the
/// blocking pool.
#[derive(Clone)]
pub struct LocalEngine {
    index: Arc<ProductIndex>,
}

impl LocalEngine {
    pub fn new(index: ProductIndex) -> Self {
        Self {
            index: Arc::new(index),
        }
    }

    pub fn open_or_create(index_dir: &Path) -> Result<Self> {
        ProductIndex::open_or_create(index_dir)
            .map(Self::new)
            .map_err(|e| AppError::Configuration(format!("{e:#}")))
    }

    pub fn in_memory() -> Result<Self> {
        ProductIndex::in_memory()
            .map(Self::new)
            .map_err(|e| AppError::Internal(format!("{e:#}")))
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ProductIndex) -> anyhow::Result<T> + Send + 'static,
    {
        let index = self.index.clone();
        tokio::task::spawn_blocking(move || op(&index))
            .await?
            .map_err(|e| AppError::Internal(format!("{e:#}")))
    }
}

#[async_trait]
impl SearchEngine for LocalEngine {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn ensure_index(&self) -> Result<()> {
        Ok(())
    }

    async fn recreate_index(&self) -> Result<()> {
        self.blocking(|index| index.clear()).await
    }

    async fn index_product(&self, product: &Product) -> Result<String> {
        let product = product.clone();
        let ids = self
            .blocking(move |index| index.add_products(std::slice::from_ref(&product)))
            .await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("Index returned no id".to_string()))
    }

    async fn bulk_index(&self, products: &[Product]) -> Result<BulkOutcome> {
        let products = products.to_vec();
        let ids = self.blocking(move |index| index.add_products(&products)).await?;
        Ok(BulkOutcome {
            indexed: ids.len(),
            ids,
            failures: Vec::new(),
        })
    }

    async fn search(&self, query: &str, size: usize) -> Result<Vec<SearchResult>> {
        let query = query.to_string();
        self.blocking(move |index| index.search(&query, size)).await
    }

    async fn instant_search(&self, query: &str, size: usize) -> Result<Vec<SearchResult>> {
        let query = query.to_string();
        self.blocking(move |index| index.instant_search(&query, size)).await
    }

    async fn autocomplete(&self, query: &str, size: usize) -> Result<Vec<Suggestion>> {
        let query = query.to_string();
        self.blocking(move |index| index.autocomplete(&query, size)).await
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: &str, brand: &str, category: &str, description: &str) -> Product {
        Product {
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            brand: Some(brand.to_string()),
            price: 10.0,
            stock: 1,
            rating: 4.0,
            reviews_count: 3,
            image_url: None,
            specifications: BTreeMap::new(),
        }
    }

    fn catalogue() -> ProductIndex {
        let index = ProductIndex::in_memory().unwrap();
        index
            .add_products(&[
                product("iPhone 15 Pro", "Apple", "Electronics", "Apple flagship smartphone"),
                product("Laptop Pro 14", "Acme", "Computers", "Lightweight laptop for work"),
                product("Gaming Laptop", "Zephyr", "Computers", "High refresh rate display"),
                product("Desk Lamp", "Lumo", "Home", "LED lamp with dimmer"),
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_name_prefixes() {
        let prefixes = name_prefixes("Go Pro");
        assert_eq!(prefixes, vec!["g", "go", "p", "pr", "pro"]);
    }

    #[test]
    fn test_name_prefixes_capped_at_max_gram() {
        let long = "a".repeat(30);
        let prefixes = name_prefixes(&long);
        assert_eq!(prefixes.len(), MAX_PREFIX_LEN);
        assert!(prefixes.iter().all(|p| p.len() <= MAX_PREFIX_LEN));
    }

    #[test]
    fn test_word_tokens() {
        assert_eq!(word_tokens("iPhone-15, Pro!"), vec!["iphone", "15", "pro"]);
        assert!(word_tokens("  ?! ").is_empty());
    }

    #[test]
    fn test_search_finds_by_name() {
        let index = catalogue();
        let results = index.search("iphone", 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].product.name, "iPhone 15 Pro");
        assert!(results[0].relevance_score >= 0.0);
        assert!(!results[0].id.is_empty());
    }

    #[test]
    fn test_search_tolerates_typo() {
        let index = catalogue();
        let results = index.search("lamq", 10).unwrap();
        assert!(results.iter().any(|r| r.product.name == "Desk Lamp"));
    }

    #[test]
    fn test_search_matches_description_and_brand() {
        let index = catalogue();
        let by_description = index.search("smartphone", 10).unwrap();
        assert_eq!(by_description[0].product.name, "iPhone 15 Pro");

        let by_brand = index.search("zephyr", 10).unwrap();
        assert_eq!(by_brand[0].product.name, "Gaming Laptop");
    }

    #[test]
    fn test_instant_search_on_partial_word() {
        let index = catalogue();
        let results = index.instant_search("lapt", 10).unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.product.name.as_str()).collect();
        assert!(names.contains(&"Laptop Pro 14"));
        assert!(names.contains(&"Gaming Laptop"));
        assert!(!names.contains(&"Desk Lamp"));
    }

    #[test]
    fn test_autocomplete_only_prefix_matches() {
        let index = catalogue();
        let suggestions = index.autocomplete("lap", 5).unwrap();
        assert!(!suggestions.is_empty());
        for s in &suggestions {
            let has_prefix_token = s
                .text
                .to_lowercase()
                .split_whitespace()
                .any(|w| w.starts_with("lap"));
            assert!(has_prefix_token, "unexpected suggestion {}", s.text);
        }
        assert!(suggestions.iter().any(|s| s.text == "Laptop Pro 14"));
        assert!(suggestions.iter().any(|s| s.text == "Laptop"));
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let index = catalogue();
        assert!(index.search("   ", 10).unwrap().is_empty());
        assert!(index.autocomplete("--", 5).unwrap().is_empty());
    }

    #[test]
    fn test_fields_round_trip_through_index() {
        let index = ProductIndex::in_memory().unwrap();
        let mut p = product("Kettle", "Boil", "Kitchen", "Electric kettle");
        p.price = 39.5;
        p.stock = 7;
        p.image_url = Some("https://img.example.com/kettle.png".to_string());
        p.specifications.insert("capacity".to_string(), "1.7L".to_string());
        index.add_products(&[p.clone()]).unwrap();

        let results = index.search("kettle", 1).unwrap();
        assert_eq!(results[0].product, p);
    }

    #[test]
    fn test_failed_batch_publishes_nothing() {
        let index = ProductIndex::in_memory().unwrap();
        let mut broken = product("Broken Kettle", "Acme", "Kitchen", "no price");
        broken.price = f64::NAN;

        let err = index
            .add_products(&[product("Good Kettle", "Acme", "Kitchen", "steel"), broken])
            .unwrap_err();
        assert!(err.to_string().contains("Broken Kettle"));
        assert_eq!(index.num_docs(), 0);

        index
            .add_products(&[product("Desk Lamp", "Lumo", "Home", "LED lamp")])
            .unwrap();
        assert_eq!(index.num_docs(), 1);
        assert!(index.search("kettle", 10).unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_everything() {
        let index = catalogue();
        assert_eq!(index.num_docs(), 4);
        index.clear().unwrap();
        assert_eq!(index.num_docs(), 0);
        assert!(index.search("laptop", 10).unwrap().is_empty());
    }

    #[test]
    fn test_open_or_create_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = ProductIndex::open_or_create(dir.path()).unwrap();
            index
                .add_products(&[product("Tripod", "Steady", "Photo", "Aluminium tripod")])
                .unwrap();
        }
        let reopened = ProductIndex::open_or_create(dir.path()).unwrap();
        assert_eq!(reopened.num_docs(), 1);
    }

    #[tokio::test]
    async fn test_engine_trait_bulk_assigns_ids() {
        let engine = LocalEngine::in_memory().unwrap();
        let outcome = engine
            .bulk_index(&[
                product("Mouse", "Clicky", "Computers", "Wireless mouse"),
                product("Keyboard", "Clicky", "Computers", "Mechanical keyboard"),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.indexed, 2);
        assert_eq!(outcome.ids.len(), 2);
        assert_ne!(outcome.ids[0], outcome.ids[1]);
    }
}
