//! Integration tests for the product-search HTTP surface.
//!
//! These run the full router against the embedded index, without a search
//! engine container or a language model (reranking degrades to engine order).

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use product_search::api;
use product_search::config::Config;
use product_search::engine::local::LocalEngine;
use product_search::engine::opensearch::OpenSearchEngine;
use product_search::state::AppState;

fn app_with_config(config: Config) -> Router {
    let engine = LocalEngine::in_memory().unwrap();
    let state = AppState::with_engine(config, Arc::new(engine), None, reqwest::Client::new());
    api::router(state)
}

fn app() -> Router {
    app_with_config(Config::default())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

fn product(name: &str, category: &str, brand: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{name} for everyday use"),
        "category": category,
        "brand": brand,
        "price": 49.99,
        "stock": 12,
        "rating": 4.4,
        "reviews_count": 87,
    })
}

async fn seed(app: &Router) {
    let (status, body) = post_json(
        app,
        "/api/products/bulk",
        json!([
            product("iPhone 15 Pro", "Electronics", "Apple"),
            product("Laptop Pro 14", "Computers", "Acme"),
            product("Gaming Laptop", "Computers", "Zephyr"),
            product("Desk Lamp", "Home", "Lumo"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["indexed"], 4);
}

#[tokio::test]
async fn test_health_and_root() {
    let app = app();

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["engine"]["kind"], "local");
    assert_eq!(body["mailbox_configured"], false);

    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["endpoints"].as_array().unwrap().len() >= 9);
}

#[tokio::test]
async fn test_index_then_search() {
    let app = app();

    let (status, body) = post_json(
        &app,
        "/api/products",
        product("Espresso Machine", "Kitchen", "Brewster"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = get(&app, "/api/search?q=espresso").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["reranked"], false);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["id"], id.as_str());
    assert_eq!(results[0]["name"], "Espresso Machine");
    assert!(results[0]["relevance_score"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn test_empty_query_rejected_everywhere() {
    let app = app();
    for uri in [
        "/api/search?q=",
        "/api/search",
        "/api/instant-search?q=%20%20",
        "/api/autocomplete?q=",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR", "{uri}");
    }
}

#[tokio::test]
async fn test_size_is_clamped() {
    let app = app();
    let batch: Vec<Value> = (0..60)
        .map(|i| product(&format!("Widget {i}"), "Tools", "Acme"))
        .collect();
    let (status, _) = post_json(&app, "/api/products/bulk", Value::Array(batch)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(&app, "/api/search?q=widget&size=500").await;
    assert_eq!(body["results"].as_array().unwrap().len(), 50);

    let (_, body) = get(&app, "/api/search?q=widget&size=3").await;
    assert_eq!(body["results"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_rerank_without_provider_matches_plain_search() {
    let app = app();
    seed(&app).await;

    let (_, plain) = get(&app, "/api/search?q=laptop").await;
    let (status, reranked) = get(&app, "/api/search?q=laptop&use_groq_rerank=true").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reranked["reranked"], false);
    let ids = |v: &Value| -> Vec<String> {
        v["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(ids(&plain), ids(&reranked));
}

#[tokio::test]
async fn test_instant_search_and_autocomplete() {
    let app = app();
    seed(&app).await;

    let (status, body) = get(&app, "/api/instant-search?q=lapt").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"Laptop Pro 14"));
    assert!(!names.contains(&"Desk Lamp"));

    let (status, body) = get(&app, "/api/autocomplete?q=lap").await;
    assert_eq!(status, StatusCode::OK);
    let suggestions = body["suggestions"].as_array().unwrap();
    assert!(!suggestions.is_empty() && suggestions.len() <= 5);
    for s in suggestions {
        let text = s["text"].as_str().unwrap().to_lowercase();
        assert!(text.split_whitespace().any(|w| w.starts_with("lap")), "{text}");
        assert!(s["type"] == "product" || s["type"] == "search_result");
    }
}

#[tokio::test]
async fn test_invalid_product_rejected_and_not_indexed() {
    let app = app();

    let mut bad = product("Broken Kettle", "Kitchen", "Boil");
    bad["stock"] = json!(-2);
    bad["price"] = json!(-5.0);
    let (status, body) = post_json(&app, "/api/products", bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("stock") && message.contains("price"));

    let (_, body) = get(&app, "/api/search?q=kettle").await;
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_bulk_with_invalid_record_writes_nothing() {
    let app = app();

    let mut missing_name = product("x", "Kitchen", "Boil");
    missing_name.as_object_mut().unwrap().remove("name");
    let (status, body) = post_json(
        &app,
        "/api/products/bulk",
        json!([product("Toaster", "Kitchen", "Crisp"), missing_name]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("product[1]"));

    let (_, body) = get(&app, "/api/search?q=toaster").await;
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_validation_error() {
    let app = app();
    let request = Request::post("/api/products")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_recreate_index_clears_catalogue() {
    let app = app();
    seed(&app).await;

    let (status, _) = post_json(&app, "/api/index/recreate", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(&app, "/api/search?q=laptop").await;
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_match_endpoint() {
    let app = app();
    seed(&app).await;

    let (status, body) = post_json(
        &app,
        "/api/match?top_k=2",
        json!({"product_name": "laptop", "description": "for work", "quantity": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["request"]["quantity"], 3);
    let matches = body["matches"].as_array().unwrap();
    assert!(!matches.is_empty() && matches.len() <= 2);
}

fn multipart_request(file_name: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let boundary = "XBOUNDARYX";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::post("/api/images/process")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_image_upload_rejects_non_images() {
    let app = app();

    let (status, body) = send(&app, multipart_request("notes.txt", "text/plain", b"hello")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = send(&app, multipart_request("fake.png", "image/png", b"not really a png")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, multipart_request("empty.png", "image/png", b"")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreadable_search_field_is_validation_error() {
    let boundary = "XBOUNDARYX";
    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"lamp.png\"\r\n\
             Content-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&png);
    // The search field is cut off before its closing boundary.
    body.extend_from_slice(
        format!(
            "\r\n--{boundary}\r\n\
             Content-Disposition: form-data; name=\"search\"\r\n\r\ntr"
        )
        .as_bytes(),
    );

    let request = Request::post("/api/images/process")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(&app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["message"].as_str().unwrap().contains("'search' field"), "{body}");
}

#[tokio::test]
async fn test_image_extraction_via_mock_model() {
    let mut server = mockito::Server::new_async().await;
    let reply = json!({
        "choices": [{"message": {"role": "assistant", "content":
            "{\"product_name\":\"Desk Lamp\",\"description\":\"LED desk lamp\",\"category\":\"Home\",\"brand\":\"Lumo\",\"specifications\":{\"power\":\"8W\"},\"estimated_price_range\":\"$20-$40\"}"
        }}]
    });
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(reply.to_string())
        .create_async()
        .await;

    let mut config = Config::default();
    config.llm.base_url = server.url();
    config.llm.api_key = Some("test-key".to_string());
    let app = app_with_config(config);

    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    let (status, body) = send(&app, multipart_request("lamp.png", "image/png", &png)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["product"]["product_name"], "Desk Lamp");
    assert_eq!(body["product"]["specifications"]["power"], "8W");
    assert!(body.get("search_results").is_none());
}

#[tokio::test]
async fn test_image_model_failure_is_unprocessable() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(json!({"choices": [{"message": {"content": "I am not sure."}}]}).to_string())
        .create_async()
        .await;

    let mut config = Config::default();
    config.llm.base_url = server.url();
    config.llm.api_key = Some("test-key".to_string());
    let app = app_with_config(config);

    let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];
    let (status, body) = send(&app, multipart_request("photo.jpg", "image/jpeg", &jpeg)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "EXTRACTION_FAILURE");
}

#[tokio::test]
async fn test_email_check_without_mailbox() {
    let app = app();
    let (status, body) = get(&app, "/api/emails/check").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn test_unreachable_engine_is_service_unavailable() {
    let engine = OpenSearchEngine::new(reqwest::Client::new(), "http://127.0.0.1:9", "products");
    let state = AppState::with_engine(
        Config::default(),
        Arc::new(engine),
        None,
        reqwest::Client::new(),
    );
    let app = api::router(state);

    let (status, body) = get(&app, "/api/search?q=laptop").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["engine"]["status"], "unreachable");
}
