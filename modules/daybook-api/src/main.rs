use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use daybook_api::{router, AppState};
use daybook_common::Config;
use daybook_pipeline::Analyzer;
use daybook_store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("daybook=info".parse()?))
        .init();

    let config = Config::from_env()?;
    config.log_redacted();

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    store.migrate().await?;

    let analyzer = Arc::new(Analyzer::from_config(&config, store.clone())?.with_holder_prefix("api"));
    let state = Arc::new(AppState::new(analyzer, store));
    let app = router(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("Daybook API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
