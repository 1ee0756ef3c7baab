pub mod emails;
pub mod health;
pub mod images;
pub mod matching;
pub mod products;
pub mod search;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

use crate::error::AppError;
use crate::state::AppState;

/// Headroom for multipart framing on top of the image limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    let image_limit = state.config.max_image_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        // Search
        .route("/api/search", get(search::search))
        .route("/api/instant-search", get(search::instant_search))
        .route("/api/autocomplete", get(search::autocomplete))
        // Indexing
        .route("/api/products", post(products::index_product))
        .route("/api/products/bulk", post(products::bulk_index))
        .route("/api/index/recreate", post(products::recreate_index))
        // Extraction and matching
        .route(
            "/api/images/process",
            post(images::process_image).layer(DefaultBodyLimit::max(image_limit)),
        )
        .route("/api/match", post(matching::match_products))
        .route("/api/emails/check", get(emails::check_emails))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}
