//! Product Indexer: validation at the indexing boundary, then single or
//! bulk writes through the engine handle.

use serde::Serialize;

use crate::engine::BulkFailure;
use crate::error::{AppError, Result};
use crate::models::{Product, ProductInput};
use crate::search::SearchClient;

/// Upper bound on products per bulk request.
pub const MAX_BULK_SIZE: usize = 1_000;

#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub status: &'static str,
    pub indexed: usize,
    pub ids: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

/// Check every field and collect all problems rather than stopping at the first.
pub fn validate_product(input: &ProductInput) -> std::result::Result<Product, Vec<String>> {
    let mut problems = Vec::new();

    let mut required_text = |field: &str, value: &Option<String>| -> String {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            Some(_) => {
                problems.push(format!("{field} must not be blank"));
                String::new()
            }
            None => {
                problems.push(format!("{field} is required"));
                String::new()
            }
        }
    };
    let name = required_text("name", &input.name);
    let description = required_text("description", &input.description);
    let category = required_text("category", &input.category);

    let price = match input.price {
        Some(p) if p.is_finite() && p >= 0.0 => p,
        Some(p) => {
            problems.push(format!("price must be a non-negative number, got {p}"));
            0.0
        }
        None => {
            problems.push("price is required".to_string());
            0.0
        }
    };

    let stock = match input.stock {
        Some(s) if s >= 0 => s as u64,
        Some(s) => {
            problems.push(format!("stock must be >= 0, got {s}"));
            0
        }
        None => {
            problems.push("stock is required".to_string());
            0
        }
    };

    let rating = match input.rating {
        None => 0.0,
        Some(r) if r.is_finite() && (0.0..=5.0).contains(&r) => r,
        Some(r) => {
            problems.push(format!("rating must be between 0 and 5, got {r}"));
            0.0
        }
    };

    let reviews_count = match input.reviews_count {
        None => 0,
        Some(n) if n >= 0 => n as u64,
        Some(n) => {
            problems.push(format!("reviews_count must be >= 0, got {n}"));
            0
        }
    };

    let image_url = match input.image_url.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match reqwest::Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(raw.to_string()),
            _ => {
                problems.push(format!("image_url must be an absolute http(s) URL, got '{raw}'"));
                None
            }
        },
    };

    let brand = input
        .brand
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string);

    if !problems.is_empty() {
        return Err(problems);
    }

    Ok(Product {
        name,
        description,
        category,
        brand,
        price,
        stock,
        rating,
        reviews_count,
        image_url,
        specifications: input.specifications.clone().unwrap_or_default(),
    })
}

/// Validate and index one product, returning its id.
pub async fn index_product(search: &SearchClient, input: &ProductInput) -> Result<String> {
    let product = validate_product(input).map_err(|problems| AppError::Validation(problems.join("; ")))?;

    let engine = search.engine();
    engine.ensure_index().await?;
    let id = engine.index_product(&product).await?;
    search.invalidate_cache();

    tracing::info!(id = %id, name = %product.name, "Indexed product");
    Ok(id)
}

/// Validate the whole batch; write nothing if any record is invalid.
pub async fn bulk_index(search: &SearchClient, inputs: &[ProductInput]) -> Result<BulkReport> {
    if inputs.is_empty() {
        return Err(AppError::Validation("Bulk request contains no products".to_string()));
    }
    if inputs.len() > MAX_BULK_SIZE {
        return Err(AppError::Validation(format!(
            "Bulk request has {} products, limit is {MAX_BULK_SIZE}",
            inputs.len()
        )));
    }

    let mut products = Vec::with_capacity(inputs.len());
    let mut errors = Vec::new();
    for (index, input) in inputs.iter().enumerate() {
        match validate_product(input) {
            Ok(product) => products.push(product),
            Err(problems) => errors.push(format!("product[{index}]: {}", problems.join(", "))),
        }
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors.join("; ")));
    }

    let engine = search.engine();
    engine.ensure_index().await?;
    let outcome = engine.bulk_index(&products).await?;
    if outcome.indexed > 0 {
        search.invalidate_cache();
    }

    let status = if outcome.failures.is_empty() { "success" } else { "partial" };
    if outcome.failures.is_empty() {
        tracing::info!(indexed = outcome.indexed, "Bulk indexed products");
    } else {
        tracing::warn!(
            indexed = outcome.indexed,
            failed = outcome.failures.len(),
            "Bulk index partially failed"
        );
    }

    Ok(BulkReport {
        status,
        indexed: outcome.indexed,
        ids: outcome.ids,
        failed: outcome.failures,
    })
}

/// Drop and recreate the product index.
pub async fn recreate_index(search: &SearchClient) -> Result<()> {
    search.engine().recreate_index().await?;
    search.invalidate_cache();
    tracing::info!(engine = search.engine().name(), "Recreated product index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::local::LocalEngine;
    use std::sync::Arc;

    fn valid_input(name: &str) -> ProductInput {
        ProductInput {
            name: Some(name.to_string()),
            description: Some("A useful thing".to_string()),
            category: Some("Home".to_string()),
            brand: Some("Acme".to_string()),
            price: Some(19.99),
            stock: Some(5),
            rating: Some(4.2),
            reviews_count: Some(12),
            image_url: Some("https://cdn.example.com/p.png".to_string()),
            specifications: None,
        }
    }

    fn client() -> SearchClient {
        let engine = LocalEngine::in_memory().unwrap();
        SearchClient::new(Arc::new(engine), reqwest::Client::new(), &Config::default())
    }

    #[test]
    fn test_valid_product_passes() {
        let product = validate_product(&valid_input("Kettle")).unwrap();
        assert_eq!(product.name, "Kettle");
        assert_eq!(product.stock, 5);
        assert_eq!(product.brand.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_collects_every_problem() {
        let input = ProductInput {
            name: Some("  ".to_string()),
            price: Some(-1.0),
            stock: Some(-3),
            rating: Some(7.0),
            image_url: Some("not a url".to_string()),
            ..ProductInput::default()
        };
        let problems = validate_product(&input).unwrap_err();
        let joined = problems.join("|");
        assert!(joined.contains("name must not be blank"));
        assert!(joined.contains("description is required"));
        assert!(joined.contains("category is required"));
        assert!(joined.contains("price"));
        assert!(joined.contains("stock"));
        assert!(joined.contains("rating"));
        assert!(joined.contains("image_url"));
    }

    #[test]
    fn test_nan_price_rejected() {
        let mut input = valid_input("Kettle");
        input.price = Some(f64::NAN);
        assert!(validate_product(&input).is_err());
    }

    #[tokio::test]
    async fn test_index_then_search() {
        let search = client();
        let id = index_product(&search, &valid_input("Espresso Machine")).await.unwrap();
        let outcome = search.search("espresso", 10, false).await.unwrap();
        assert_eq!(outcome.results[0].id, id);
    }

    #[tokio::test]
    async fn test_invalid_single_product_not_written() {
        let search = client();
        let mut input = valid_input("Broken");
        input.stock = Some(-1);
        let err = index_product(&search, &input).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let outcome = search.search("broken", 10, false).await.unwrap();
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_all_or_nothing_on_validation() {
        let search = client();
        let mut bad = valid_input("Bad Toaster");
        bad.price = None;
        let err = bulk_index(&search, &[valid_input("Good Toaster"), bad])
            .await
            .unwrap_err();

        match err {
            AppError::Validation(msg) => assert!(msg.contains("product[1]")),
            other => panic!("unexpected error {other:?}"),
        }
        let outcome = search.search("toaster", 10, false).await.unwrap();
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_indexes_and_invalidates_cache() {
        let search = client();
        assert!(search.search("blender", 10, false).await.unwrap().results.is_empty());

        let report = bulk_index(&search, &[valid_input("Blender"), valid_input("Blender Max")])
            .await
            .unwrap();
        assert_eq!(report.status, "success");
        assert_eq!(report.indexed, 2);

        assert_eq!(search.search("blender", 10, false).await.unwrap().results.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_bulk_rejected() {
        let search = client();
        assert!(matches!(bulk_index(&search, &[]).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_recreate_empties_index() {
        let search = client();
        index_product(&search, &valid_input("Toaster")).await.unwrap();
        recreate_index(&search).await.unwrap();
        assert!(search.search("toaster", 10, false).await.unwrap().results.is_empty());
    }
}
