//! Chat-completion plumbing shared by the reranker, the image extractor and
//! the email request extractor.
//!
//! Two wire formats are spoken: OpenAI-compatible `/v1/chat/completions`
//! (Groq, OpenAI, most hosted providers) and Ollama's `/api/chat`.

pub mod extract;
pub mod rerank;
pub mod vision;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::AppError;

/// An image attached to a user message.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime: &'static str,
    pub base64: String,
}

impl InlineImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub text: String,
    pub image: Option<InlineImage>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system",
            text: text.into(),
            image: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user",
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }
}

/// Sampling settings for one completion.
#[derive(Debug, Clone, Copy)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Fail fast when no call can succeed with this configuration.
pub fn ensure_ready(config: &LlmConfig) -> Result<()> {
    match config.provider.as_str() {
        "ollama" => Ok(()),
        "groq" | "openai" => match config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => anyhow::bail!("No API key configured for provider '{}'", config.provider),
        },
        other => anyhow::bail!("Unknown LLM provider: {other}"),
    }
}

/// Run one chat completion and return the assistant text.
pub async fn complete(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
    messages: &[ChatMessage],
    sampling: Sampling,
) -> Result<String> {
    ensure_ready(config)?;
    match config.provider.as_str() {
        "ollama" => call_ollama(client, config, model, messages, sampling).await,
        _ => call_openai(client, config, model, messages, sampling).await,
    }
}

/// Map an LLM helper error onto the API taxonomy: unreachable provider is
/// ServiceUnavailable, rejected key is Authentication, everything else goes
/// through `otherwise`.
pub fn classify_error(err: &anyhow::Error, otherwise: fn(String) -> AppError) -> AppError {
    if let Some(req_err) = err.downcast_ref::<reqwest::Error>() {
        if req_err.is_connect() || req_err.is_timeout() {
            return AppError::ServiceUnavailable(format!("LLM provider unreachable: {err:#}"));
        }
    }
    if let Some(status) = err.downcast_ref::<ProviderStatus>() {
        if status.0 == 401 || status.0 == 403 {
            return AppError::Authentication(format!("LLM provider rejected credentials: {err:#}"));
        }
    }
    otherwise(format!("{err:#}"))
}

/// Non-success HTTP status returned by the provider.
#[derive(Debug, thiserror::Error)]
#[error("provider returned HTTP {0}")]
pub struct ProviderStatus(pub u16);

/// Pull the first JSON object or array out of free-form model output.
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Cut a string to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

async fn call_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
    messages: &[ChatMessage],
    sampling: Sampling,
) -> Result<String> {
    let url = format!("{}/api/chat", config.base_url);

    let req = OllamaChatRequest {
        model: model.to_string(),
        messages: messages
            .iter()
            .map(|m| OllamaMessage {
                role: m.role.to_string(),
                content: m.text.clone(),
                images: m.image.iter().map(|img| img.base64.clone()).collect(),
            })
            .collect(),
        stream: false,
        options: OllamaOptions {
            temperature: sampling.temperature,
            num_predict: sampling.max_tokens,
        },
    };

    let resp = client
        .post(&url)
        .timeout(Duration::from_secs(config.timeout_secs))
        .json(&req)
        .send()
        .await
        .context("Failed to call Ollama")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow::Error::new(ProviderStatus(status.as_u16()))
            .context(format!("Ollama chat call failed: {body}")));
    }

    let body: OllamaChatResponse = resp.json().await.context("Malformed Ollama response")?;
    Ok(body.message.content)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: String,
    content: OpenAiContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Serialize)]
struct OpenAiImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

impl From<&ChatMessage> for OpenAiMessage {
    fn from(m: &ChatMessage) -> Self {
        let content = match &m.image {
            None => OpenAiContent::Text(m.text.clone()),
            Some(image) => OpenAiContent::Parts(vec![
                OpenAiPart::Text {
                    text: m.text.clone(),
                },
                OpenAiPart::ImageUrl {
                    image_url: OpenAiImageUrl {
                        url: image.data_url(),
                    },
                },
            ]),
        };
        Self {
            role: m.role.to_string(),
            content,
        }
    }
}

async fn call_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
    messages: &[ChatMessage],
    sampling: Sampling,
) -> Result<String> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let req = OpenAiChatRequest {
        model: model.to_string(),
        messages: messages.iter().map(OpenAiMessage::from).collect(),
        temperature: sampling.temperature,
        max_tokens: sampling.max_tokens,
    };

    let resp = client
        .post(&url)
        .timeout(Duration::from_secs(config.timeout_secs))
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&req)
        .send()
        .await
        .with_context(|| format!("Failed to call {} chat API", config.provider))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow::Error::new(ProviderStatus(status.as_u16()))
            .context(format!("{} chat call failed: {body}", config.provider)));
    }

    let body: OpenAiChatResponse = resp
        .json()
        .await
        .with_context(|| format!("Malformed {} chat response", config.provider))?;
    Ok(body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config(base_url: &str) -> LlmConfig {
        LlmConfig {
            provider: "groq".to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: Some("test-key".to_string()),
            timeout_secs: 5,
            ..LlmConfig::default()
        }
    }

    pub(crate) fn completion_body(content: &str) -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    #[test]
    fn test_ensure_ready_requires_key_for_cloud() {
        let mut config = LlmConfig::default();
        assert!(ensure_ready(&config).is_err());
        config.api_key = Some("k".to_string());
        assert!(ensure_ready(&config).is_ok());
        config.provider = "ollama".to_string();
        config.api_key = None;
        assert!(ensure_ready(&config).is_ok());
        config.provider = "mystery".to_string();
        assert!(ensure_ready(&config).is_err());
    }

    #[test]
    fn test_extract_json_from_chatter() {
        let v = extract_json("Sure! {\"score\": 80} hope that helps").unwrap();
        assert_eq!(v["score"], 80);
        let v = extract_json("```json\n[{\"a\":1}]\n```").unwrap();
        assert!(v.is_array());
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_image_message_serializes_as_parts() {
        let msg = ChatMessage::user("describe").with_image(InlineImage {
            mime: "image/png",
            base64: "AAAA".to_string(),
        });
        let json = serde_json::to_value(OpenAiMessage::from(&msg)).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[tokio::test]
    async fn test_complete_sends_bearer_and_reads_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("42"))
            .create_async()
            .await;

        let config = test_config(&server.url());
        let text = complete(
            &reqwest::Client::new(),
            &config,
            "m",
            &[ChatMessage::user("hi")],
            Sampling {
                temperature: 0.1,
                max_tokens: 10,
            },
        )
        .await
        .unwrap();

        assert_eq!(text, "42");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_classify_rejected_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body("invalid key")
            .create_async()
            .await;

        let config = test_config(&server.url());
        let err = complete(
            &reqwest::Client::new(),
            &config,
            "m",
            &[ChatMessage::user("hi")],
            Sampling {
                temperature: 0.1,
                max_tokens: 10,
            },
        )
        .await
        .unwrap_err();

        let app_err = classify_error(&err, AppError::ExtractionFailure);
        assert!(matches!(app_err, AppError::Authentication(_)));
    }
}
