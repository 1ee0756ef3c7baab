use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,
    /// Search engine configuration
    pub engine: EngineConfig,
    /// LLM provider configuration (rerank, extraction, vision)
    pub llm: LlmConfig,
    /// Mailbox configuration for the email ingestor
    pub email: EmailConfig,
    /// Result cache TTL for full and instant search, in seconds
    pub search_cache_ttl_secs: u64,
    /// Result cache TTL for autocomplete, in seconds
    pub autocomplete_cache_ttl_secs: u64,
    /// Maximum accepted image upload size in bytes
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// External OpenSearch/Elasticsearch over REST
    OpenSearch,
    /// Embedded tantivy index on local disk
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Normalized engine URL (scheme://host:port)
    pub host: String,
    /// Index name holding the product documents
    pub index_name: String,
    /// Directory for the local engine's index files
    pub index_dir: PathBuf,
    /// Overall request timeout for engine calls
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "groq", "openai" or "ollama"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// API key (required by cloud providers)
    pub api_key: Option<String>,
    /// Small fast model used for per-hit relevance scoring
    pub rerank_model: String,
    /// Model used to turn email text into product requests
    pub extract_model: String,
    /// Vision-capable model used for image extraction
    pub vision_model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// IMAP server host. Polling is unavailable when unset.
    pub server: Option<String>,
    pub port: u16,
    pub tls: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Seconds between scheduled polls (0 disables the scheduler)
    pub poll_interval_secs: u64,
    /// Upper bound on messages handled in one poll
    pub max_per_poll: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            engine: EngineConfig::default(),
            llm: LlmConfig::default(),
            email: EmailConfig::default(),
            search_cache_ttl_secs: 60,
            autocomplete_cache_ttl_secs: 30,
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::OpenSearch,
            host: DEFAULT_ENGINE_URL.to_string(),
            index_name: "products".to_string(),
            index_dir: PathBuf::from("./data/index"),
            timeout_secs: 30,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            base_url: "https://api.groq.com/openai".to_string(),
            api_key: None,
            rerank_model: "llama-3.1-8b-instant".to_string(),
            extract_model: "llama-3.3-70b-versatile".to_string(),
            vision_model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            server: None,
            port: 993,
            tls: true,
            user: None,
            password: None,
            poll_interval_secs: 0,
            max_per_poll: 20,
        }
    }
}

const DEFAULT_ENGINE_URL: &str = "http://opensearch:9200";

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PRODUCT_SEARCH_BIND_ADDR") {
            config.bind_addr = addr;
        }

        // Engine
        if let Ok(kind) = std::env::var("SEARCH_ENGINE") {
            match kind.to_lowercase().as_str() {
                "local" | "tantivy" => config.engine.kind = EngineKind::Local,
                "opensearch" | "elasticsearch" => config.engine.kind = EngineKind::OpenSearch,
                other => tracing::warn!("Unknown SEARCH_ENGINE '{other}', using opensearch"),
            }
        }
        if let Ok(host) = std::env::var("OPENSEARCH_HOST")
            .or_else(|_| std::env::var("ELASTICSEARCH_HOST"))
        {
            config.engine.host = normalize_engine_url(&host);
        }
        if let Ok(name) = std::env::var("SEARCH_INDEX_NAME") {
            config.engine.index_name = name;
        }
        if let Ok(dir) = std::env::var("SEARCH_INDEX_DIR") {
            config.engine.index_dir = PathBuf::from(dir);
        }
        if let Ok(val) = std::env::var("ENGINE_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.engine.timeout_secs = v;
            }
        }

        // LLM
        if let Ok(key) = std::env::var("GROQ_API_KEY").or_else(|_| std::env::var("LLM_API_KEY")) {
            if !key.trim().is_empty() {
                config.llm.api_key = Some(key);
            }
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("LLM_RERANK_MODEL") {
            config.llm.rerank_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EXTRACT_MODEL") {
            config.llm.extract_model = model;
        }
        if let Ok(model) = std::env::var("LLM_VISION_MODEL") {
            config.llm.vision_model = model;
        }
        if let Ok(val) = std::env::var("LLM_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.llm.timeout_secs = v;
            }
        }

        // Mailbox
        if let Ok(server) = std::env::var("EMAIL_SERVER") {
            if !server.trim().is_empty() {
                config.email.server = Some(server);
            }
        }
        if let Ok(val) = std::env::var("EMAIL_PORT") {
            if let Ok(v) = val.parse() {
                config.email.port = v;
            }
        }
        if let Ok(val) = std::env::var("EMAIL_TLS") {
            config.email.tls = !matches!(val.to_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Ok(user) = std::env::var("EMAIL_USER") {
            config.email.user = Some(user);
        }
        if let Ok(password) = std::env::var("EMAIL_PASSWORD") {
            config.email.password = Some(password);
        }
        if let Ok(val) = std::env::var("EMAIL_POLL_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                config.email.poll_interval_secs = v;
            }
        }
        if let Ok(val) = std::env::var("EMAIL_MAX_PER_POLL") {
            if let Ok(v) = val.parse() {
                config.email.max_per_poll = v;
            }
        }

        // Cache and limits
        if let Ok(val) = std::env::var("SEARCH_CACHE_TTL_SECS") {
            if let Ok(v) = val.parse() {
                config.search_cache_ttl_secs = v;
            }
        }
        if let Ok(val) = std::env::var("AUTOCOMPLETE_CACHE_TTL_SECS") {
            if let Ok(v) = val.parse() {
                config.autocomplete_cache_ttl_secs = v;
            }
        }
        if let Ok(val) = std::env::var("MAX_IMAGE_BYTES") {
            if let Ok(v) = val.parse() {
                config.max_image_bytes = v;
            }
        }

        config
    }
}

/// Reduce an engine URL to `scheme://host:port`, defaulting the port to 9200
/// and falling back to the default URL when scheme or host are missing.
pub fn normalize_engine_url(raw: &str) -> String {
    let parsed = match reqwest::Url::parse(raw.trim()) {
        Ok(url) if url.host_str().is_some() => url,
        _ => return DEFAULT_ENGINE_URL.to_string(),
    };

    let host = parsed.host_str().unwrap_or("opensearch");
    // `Url::port` hides a port equal to the scheme default, so `:443` must be
    // read back from the authority.
    let port = match parsed.port() {
        Some(port) => port,
        None if has_explicit_port(raw) => parsed.port_or_known_default().unwrap_or(9200),
        None => 9200,
    };
    format!("{}://{}:{}", parsed.scheme(), host, port)
}

/// Whether the authority of `raw` spells out a `:port`.
fn has_explicit_port(raw: &str) -> bool {
    let Some((_, rest)) = raw.trim().split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let after_host = match host_port.rfind(']') {
        Some(close) => &host_port[close + 1..],
        None => host_port,
    };
    after_host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}
