use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::llm;
use crate::state::AppState;

/// GET / - service banner with the endpoint list
pub async fn root() -> Json<Value> {
    Json(json!({
        "status": "success",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /api/search?q=&size=&use_groq_rerank=",
            "GET /api/instant-search?q=&size=",
            "GET /api/autocomplete?q=&size=",
            "POST /api/images/process",
            "POST /api/products",
            "POST /api/products/bulk",
            "POST /api/index/recreate",
            "POST /api/match?top_k=",
            "GET /api/emails/check",
            "GET /health",
        ],
    }))
}

/// GET /health - liveness plus collaborator status. Always 200.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let engine = state.search.engine();
    let engine_status = match engine.health().await {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            tracing::warn!(engine = engine.name(), "Engine health check failed: {e}");
            "unreachable".to_string()
        }
    };

    Json(json!({
        "status": "healthy",
        "engine": {
            "kind": engine.name(),
            "status": engine_status,
        },
        "llm_configured": llm::ensure_ready(&state.config.llm).is_ok(),
        "mailbox_configured": state.ingestor.is_configured(),
    }))
}
