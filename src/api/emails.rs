use axum::extract::State;
use axum::Json;

use crate::error::Result;
use crate::models::EmailCheckResponse;
use crate::state::AppState;

/// GET /api/emails/check - poll the mailbox now
pub async fn check_emails(State(state): State<AppState>) -> Result<Json<EmailCheckResponse>> {
    let report = state.ingestor.poll().await?;
    Ok(Json(report))
}
