use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;

use crate::error::Result;
use crate::matcher;
use crate::models::{clamp_size, MatchParams, ProductRequest, SearchResult, DEFAULT_MATCH_TOP_K};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub status: String,
    pub request: ProductRequest,
    pub matches: Vec<SearchResult>,
}

/// POST /api/match - match a structured product request against the catalogue
pub async fn match_products(
    State(state): State<AppState>,
    params: std::result::Result<Query<MatchParams>, QueryRejection>,
    body: std::result::Result<Json<ProductRequest>, JsonRejection>,
) -> Result<Json<MatchResponse>> {
    let Query(params) = params?;
    let Json(request) = body?;
    let top_k = clamp_size(params.top_k, DEFAULT_MATCH_TOP_K);

    let matches = matcher::match_products(&state.search, &request, top_k).await?;
    tracing::info!(request = %request.product_name, matches = matches.len(), "Matched request");

    Ok(Json(MatchResponse {
        status: "success".to_string(),
        request,
        matches,
    }))
}
