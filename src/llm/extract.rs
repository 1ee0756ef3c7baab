use anyhow::{Context, Result};

use super::{complete, extract_json, truncate_chars, ChatMessage, Sampling};
use crate::config::LlmConfig;
use crate::models::{EmailRequest, ProductRequest};

const SAMPLING: Sampling = Sampling {
    temperature: 0.1,
    max_tokens: 800,
};

/// Characters of email body placed in the prompt.
const MAX_BODY_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "You extract product purchase requests from customer emails. \
Respond with ONLY a JSON array. Each element is an object with keys \
\"product_name\" (string), \"description\" (string), \"specifications\" (object of string values), \
\"quantity\" (integer, default 1) and \"priority\" (\"low\", \"normal\" or \"high\"). \
Return [] when the email does not ask for any product.";

/// Ask the model which products an email is asking for.
pub async fn extract_requests(
    client: &reqwest::Client,
    config: &LlmConfig,
    email: &EmailRequest,
) -> Result<Vec<ProductRequest>> {
    let user = format!(
        "From: {}\nSubject: {}\n\n{}",
        email.sender,
        email.subject,
        truncate_chars(&email.body, MAX_BODY_CHARS)
    );

    let text = complete(
        client,
        config,
        &config.extract_model,
        &[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
        SAMPLING,
    )
    .await?;

    parse_requests(&text)
}

/// Accepts a single object or an array of objects; entries without a product
/// name are dropped.
fn parse_requests(text: &str) -> Result<Vec<ProductRequest>> {
    let value = extract_json(text).context("Model output contained no JSON")?;

    let requests: Vec<ProductRequest> = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(req) => Some(req),
                Err(e) => {
                    tracing::warn!("Skipping malformed product request: {e}");
                    None
                }
            })
            .collect(),
        object @ serde_json::Value::Object(_) => {
            vec![serde_json::from_value(object).context("Malformed product request")?]
        }
        other => anyhow::bail!("Expected JSON object or array, got {other}"),
    };

    Ok(requests
        .into_iter()
        .filter(|r| !r.product_name.trim().is_empty())
        .map(|mut r| {
            r.quantity = r.quantity.max(1);
            r
        })
        .collect())
}
