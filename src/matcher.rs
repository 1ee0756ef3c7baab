use crate::error::{AppError, Result};
use crate::llm::rerank::RerankTarget;
use crate::models::{ProductRequest, SearchResult, MAX_RESULT_SIZE};
use crate::search::SearchClient;

/// Candidates retrieved per requested match.
const CANDIDATE_FACTOR: usize = 3;

/// Match a structured request against the catalogue: retrieve candidates
/// with a full search, then let the model score request/candidate fit.
pub async fn match_products(
    search: &SearchClient,
    request: &ProductRequest,
    top_k: usize,
) -> Result<Vec<SearchResult>> {
    if request.product_name.trim().is_empty() {
        return Err(AppError::Validation("product_name must not be empty".to_string()));
    }

    let query = request.query_text();
    let candidates = search
        .engine()
        .search(&query, (top_k * CANDIDATE_FACTOR).min(MAX_RESULT_SIZE * CANDIDATE_FACTOR))
        .await?;
    tracing::debug!(
        request = %request.product_name,
        candidates = candidates.len(),
        "Retrieved match candidates"
    );

    let outcome = search
        .rerank_or_keep(RerankTarget::Request(request), candidates, top_k)
        .await;
    Ok(outcome.results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::local::LocalEngine;
    use crate::engine::SearchEngine;
    use crate::llm::tests::completion_body;
    use crate::models::Product;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn product(name: &str, description: &str) -> Product {
        Product {
            name: name.to_string(),
            description: description.to_string(),
            category: "Computers".to_string(),
            brand: None,
            price: 999.0,
            stock: 4,
            rating: 4.0,
            reviews_count: 2,
            image_url: None,
            specifications: BTreeMap::new(),
        }
    }

    fn request(name: &str) -> ProductRequest {
        ProductRequest {
            product_name: name.to_string(),
            description: String::new(),
            specifications: BTreeMap::new(),
            quantity: 1,
            priority: "normal".to_string(),
        }
    }

    async fn client(config: &Config) -> SearchClient {
        let engine = LocalEngine::in_memory().unwrap();
        engine
            .bulk_index(&[
                product("Laptop Pro 14", "14 inch laptop with 16GB RAM"),
                product("Laptop Air", "Thin laptop with 8GB RAM"),
                product("Gaming Laptop", "Laptop with discrete GPU"),
                product("Desk Lamp", "LED lamp"),
            ])
            .await
            .unwrap();
        SearchClient::new(Arc::new(engine), reqwest::Client::new(), config)
    }

    #[tokio::test]
    async fn test_match_without_llm_uses_engine_order() {
        let search = client(&Config::default()).await;
        let matches = match_products(&search, &request("laptop"), 2).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.product.name.contains("Laptop")));
    }

    #[tokio::test]
    async fn test_blank_request_rejected() {
        let search = client(&Config::default()).await;
        let err = match_products(&search, &request("  "), 5).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_match_uses_model_scores() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::Regex("Product: Gaming Laptop".to_string()))
            .with_status(200)
            .with_body(completion_body("97"))
            .create_async()
            .await;
        server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::Regex("Product: Laptop ".to_string()))
            .with_status(200)
            .with_body(completion_body("15"))
            .create_async()
            .await;

        let mut config = Config::default();
        config.llm.base_url = server.url();
        config.llm.api_key = Some("test-key".to_string());
        let search = client(&config).await;

        let mut req = request("laptop");
        req.description = "needs a discrete GPU for gaming".to_string();
        let matches = match_products(&search, &req, 1).await.unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].product.name, "Gaming Laptop");
        assert_eq!(matches[0].relevance_score, 97.0);
    }
}
