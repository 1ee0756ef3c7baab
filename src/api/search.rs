use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;

use crate::error::Result;
use crate::models::{
    clamp_size, AutocompleteResponse, QuickSearchParams, SearchParams, SearchResponse,
    DEFAULT_AUTOCOMPLETE_SIZE, DEFAULT_SEARCH_SIZE,
};
use crate::state::AppState;

/// GET /api/search - full search, optionally reranked by the language model
pub async fn search(
    State(state): State<AppState>,
    params: std::result::Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>> {
    let Query(params) = params?;
    let size = clamp_size(params.size, DEFAULT_SEARCH_SIZE);

    let outcome = state
        .search
        .search(&params.q, size, params.use_groq_rerank)
        .await?;

    tracing::info!(
        query = %params.q.trim(),
        hits = outcome.results.len(),
        reranked = outcome.reranked,
        "Search"
    );

    Ok(Json(SearchResponse {
        status: "success".to_string(),
        query: params.q.trim().to_string(),
        reranked: outcome.reranked,
        results: outcome.results,
    }))
}

/// GET /api/instant-search - low-latency prefix search
pub async fn instant_search(
    State(state): State<AppState>,
    params: std::result::Result<Query<QuickSearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>> {
    let Query(params) = params?;
    let size = clamp_size(params.size, DEFAULT_SEARCH_SIZE);

    let results = state.search.instant_search(&params.q, size).await?;

    Ok(Json(SearchResponse {
        status: "success".to_string(),
        query: params.q.trim().to_string(),
        reranked: false,
        results,
    }))
}

/// GET /api/autocomplete - prefix suggestions for the search box
pub async fn autocomplete(
    State(state): State<AppState>,
    params: std::result::Result<Query<QuickSearchParams>, QueryRejection>,
) -> Result<Json<AutocompleteResponse>> {
    let Query(params) = params?;
    let size = clamp_size(params.size, DEFAULT_AUTOCOMPLETE_SIZE);

    let suggestions = state.search.autocomplete(&params.q, size).await?;

    Ok(Json(AutocompleteResponse {
        status: "success".to_string(),
        query: params.q.trim().to_string(),
        suggestions,
    }))
}
