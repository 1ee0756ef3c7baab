use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::error::Result;
use crate::indexer::{self, BulkReport};
use crate::models::ProductInput;
use crate::state::AppState;

/// POST /api/products - validate and index one product
pub async fn index_product(
    State(state): State<AppState>,
    body: std::result::Result<Json<ProductInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>)> {
    let Json(input) = body?;
    let id = indexer::index_product(&state.search, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "id": id,
        })),
    ))
}

/// POST /api/products/bulk - validate a batch, then index it in one request
pub async fn bulk_index(
    State(state): State<AppState>,
    body: std::result::Result<Json<Vec<ProductInput>>, JsonRejection>,
) -> Result<Json<BulkReport>> {
    let Json(inputs) = body?;
    let report = indexer::bulk_index(&state.search, &inputs).await?;
    Ok(Json(report))
}

/// POST /api/index/recreate - drop and recreate the product index
pub async fn recreate_index(State(state): State<AppState>) -> Result<Json<Value>> {
    indexer::recreate_index(&state.search).await?;
    Ok(Json(json!({
        "status": "success",
        "message": "Index recreated",
    })))
}
