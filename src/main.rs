use anyhow::Result;
use sales_call_analyzer::{
    Config, SalesAnalyzer, clients,
    http::{HttpState, start_http_server},
    init_tracing,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config.runtime.log_level);

    info!(
        "Starting sales-call analyzer: provider={}, model={}, bind={}",
        config.system.provider, config.system.model, config.http.bind
    );

    let model = clients::create_model(&config)?;
    let analyzer = SalesAnalyzer::new(model);
    let state = HttpState::new(Arc::new(config), analyzer);

    start_http_server(state).await?;
    Ok(())
}
