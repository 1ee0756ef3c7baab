use std::time::Duration;

use tracing_subscriber::EnvFilter;

use product_search::api;
use product_search::config::Config;
use product_search::mail::run_poll_loop;
use product_search::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        "Search engine: {:?} ({}, index '{}')",
        config.engine.kind,
        config.engine.host,
        config.engine.index_name
    );
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);
    if config.llm.api_key.is_none() && config.llm.provider != "ollama" {
        tracing::warn!("No LLM API key configured: reranking is disabled, extraction will fail");
    }

    let state = AppState::new(config.clone())?;

    // Best effort; writes create the index again if this fails.
    if let Err(e) = state.search.engine().ensure_index().await {
        tracing::warn!("Could not prepare product index at startup: {e}");
    }

    if config.email.poll_interval_secs > 0 {
        if state.ingestor.is_configured() {
            tracing::info!("Polling mailbox every {}s", config.email.poll_interval_secs);
            tokio::spawn(run_poll_loop(
                state.ingestor.clone(),
                Duration::from_secs(config.email.poll_interval_secs),
            ));
        } else {
            tracing::warn!("EMAIL_POLL_INTERVAL_SECS is set but the mailbox is not configured");
        }
    }

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
