use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;

use super::{complete, ensure_ready, truncate_chars, ChatMessage, Sampling};
use crate::config::LlmConfig;
use crate::models::{ProductRequest, SearchResult};

/// Concurrent scoring calls per rerank.
const MAX_CONCURRENT_CALLS: usize = 4;

/// Characters of query and product name placed in the prompt.
const MAX_PROMPT_FIELD_CHARS: usize = 100;

const SAMPLING: Sampling = Sampling {
    temperature: 0.1,
    max_tokens: 10,
};

/// What the hits are being judged against.
#[derive(Debug, Clone, Copy)]
pub enum RerankTarget<'a> {
    /// A free-text search query
    Query(&'a str),
    /// A structured product request from `/api/match` or an email
    Request(&'a ProductRequest),
}

/// Score every hit 0-100 with the language model, reorder by that score
/// and truncate to `size`.
///
/// Returns an error only when no call can be made at all (missing key,
/// unknown provider); callers treat that as "leave the hits alone". A single
/// failed call gives that hit its positional score instead.
pub async fn rerank(
    client: &reqwest::Client,
    config: &LlmConfig,
    target: RerankTarget<'_>,
    hits: Vec<SearchResult>,
    size: usize,
) -> Result<Vec<SearchResult>> {
    ensure_ready(config)?;
    if hits.is_empty() {
        return Ok(hits);
    }

    let prompts: Vec<String> = hits.iter().map(|hit| build_prompt(target, hit)).collect();
    let scores = score_prompts(client, config, prompts).await;

    let mut scored: Vec<SearchResult> = hits
        .into_iter()
        .zip(scores)
        .map(|(mut hit, score)| {
            hit.relevance_score = score;
            hit
        })
        .collect();

    scored.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(size);

    Ok(scored)
}

/// Score each prompt with at most `MAX_CONCURRENT_CALLS` calls in flight.
/// Scores come back in prompt order; a failed call yields its positional score.
async fn score_prompts(client: &reqwest::Client, config: &LlmConfig, prompts: Vec<String>) -> Vec<f32> {
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CALLS));
    let mut handles = Vec::with_capacity(prompts.len());

    for prompt in prompts {
        let client = client.clone();
        let config = config.clone();
        let sem = semaphore.clone();

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await?;
            let text = complete(
                &client,
                &config,
                &config.rerank_model,
                &[ChatMessage::user(prompt)],
                SAMPLING,
            )
            .await?;
            parse_score(&text)
        }));
    }

    let mut scores = Vec::with_capacity(handles.len());
    for (position, handle) in handles.into_iter().enumerate() {
        let score = match handle.await {
            Ok(Ok(score)) => score,
            Ok(Err(e)) => {
                tracing::debug!(position, "Rerank call failed, using positional score: {e:#}");
                positional_score(position)
            }
            Err(e) => {
                tracing::warn!(position, "Rerank task failed: {e}");
                positional_score(position)
            }
        };
        scores.push(score);
    }
    scores
}

/// Fallback score for the hit at `position`: `max(100 - 5*position, 10)`.
pub fn positional_score(position: usize) -> f32 {
    let score = 100i64 - 5 * position.min(1_000) as i64;
    score.max(10) as f32
}

fn build_prompt(target: RerankTarget<'_>, hit: &SearchResult) -> String {
    let product = &hit.product;
    let name = truncate_chars(&product.name, MAX_PROMPT_FIELD_CHARS);
    let brand = product.brand.as_deref().unwrap_or("unknown");

    match target {
        RerankTarget::Query(query) => format!(
            "Rate how relevant this product is to the search query on a scale of 0-100.\n\
             Query: {}\n\
             Product: {name}\n\
             Category: {}\n\
             Brand: {brand}\n\
             Respond with only the number.",
            truncate_chars(query, MAX_PROMPT_FIELD_CHARS),
            product.category,
        ),
        RerankTarget::Request(request) => {
            let specs = request
                .specifications
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "Rate how well this product satisfies the customer request on a scale of 0-100.\n\
                 Requested: {}\n\
                 Request details: {}\n\
                 Required specifications: {specs}\n\
                 Quantity: {}\n\n\
                 Product: {name}\n\
                 Description: {}\n\
                 Category: {}\n\
                 Brand: {brand}\n\
                 Price: {:.2}\n\
                 In stock: {}\n\
                 Respond with only the number.",
                truncate_chars(&request.product_name, MAX_PROMPT_FIELD_CHARS),
                truncate_chars(&request.description, 300),
                request.quantity,
                truncate_chars(&product.description, 300),
                product.category,
                product.price,
                product.stock,
            )
        }
    }
}

/// Number in the model output, clamped to [0, 100]. When the output has a
/// label such as `Score (0-100): 85`, the number after the last colon wins.
fn parse_score(text: &str) -> Result<f32> {
    let tail = match text.rfind(':') {
        Some(colon) if text[colon..].contains(|c: char| c.is_ascii_digit()) => &text[colon..],
        _ => text,
    };
    let start = tail
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| anyhow::anyhow!("No score in model output: {text:?}"))?;
    let number: String = tail[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let score: f32 = number.trim_end_matches('.').parse()?;
    Ok(score.clamp(0.0, 100.0))
}
