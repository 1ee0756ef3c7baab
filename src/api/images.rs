use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::llm::vision;
use crate::models::{ExtractedProduct, SearchResult, DEFAULT_SEARCH_SIZE};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ImageParams {
    #[serde(default)]
    pub search: bool,
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub status: String,
    pub product: ExtractedProduct,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<SearchResult>>,
}

struct Upload {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// POST /api/images/process - extract product fields from an uploaded image
pub async fn process_image(
    State(state): State<AppState>,
    Query(params): Query<ImageParams>,
    mut multipart: Multipart,
) -> Result<Json<ImageResponse>> {
    let mut upload = None;
    let mut run_search = params.search;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read upload: {e}")))?;
                upload = Some(Upload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            Some("search") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read 'search' field: {e}")))?;
                run_search |= matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes");
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| AppError::Validation("Missing 'file' field".to_string()))?;
    vision::check_declared_type(upload.file_name.as_deref(), upload.content_type.as_deref())?;
    let format = vision::validate_image(&upload.bytes, state.config.max_image_bytes)?;

    let product =
        vision::extract_product(&state.http_client, &state.config.llm, &upload.bytes, format).await?;

    let search_results = if run_search {
        let outcome = state
            .search
            .search(&product.product_name, DEFAULT_SEARCH_SIZE, false)
            .await?;
        Some(outcome.results)
    } else {
        None
    };

    Ok(Json(ImageResponse {
        status: "success".to_string(),
        product,
        search_results,
    }))
}
