use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, EngineKind};
use crate::engine::local::LocalEngine;
use crate::engine::opensearch::OpenSearchEngine;
use crate::engine::SearchEngine;
use crate::mail::{EmailIngestor, ImapSource, MailSource};
use crate::search::SearchClient;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub search: SearchClient,
    pub ingestor: Arc<EmailIngestor>,
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Build state with the engine selected by `config.engine.kind`.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(
                config.engine.timeout_secs.max(config.llm.timeout_secs),
            ))
            .build()?;

        let engine: Arc<dyn SearchEngine> = match config.engine.kind {
            EngineKind::OpenSearch => {
                let engine_client = reqwest::Client::builder()
                    .connect_timeout(Duration::from_secs(10))
                    .timeout(Duration::from_secs(config.engine.timeout_secs))
                    .build()?;
                Arc::new(OpenSearchEngine::new(
                    engine_client,
                    &config.engine.host,
                    &config.engine.index_name,
                ))
            }
            EngineKind::Local => Arc::new(LocalEngine::open_or_create(&config.engine.index_dir)?),
        };

        let source = ImapSource::from_config(&config.email).map(|s| Arc::new(s) as Arc<dyn MailSource>);
        Ok(Self::with_engine(config, engine, source, http_client))
    }

    /// Build state around an existing engine and mail source.
    pub fn with_engine(
        config: Config,
        engine: Arc<dyn SearchEngine>,
        mail_source: Option<Arc<dyn MailSource>>,
        http_client: reqwest::Client,
    ) -> Self {
        let search = SearchClient::new(engine, http_client.clone(), &config);
        let ingestor = EmailIngestor::new(
            mail_source,
            search.clone(),
            http_client.clone(),
            config.llm.clone(),
            config.email.max_per_poll,
        );

        Self {
            config: Arc::new(config),
            search,
            ingestor: Arc::new(ingestor),
            http_client,
        }
    }
}
