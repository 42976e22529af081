use ro_tax_orchestrator::{agent::Orchestrator, api::start_server, config::Settings};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(
        port = settings.port,
        threshold = settings.intent_confidence_threshold,
        "Romanian tax orchestrator - API server"
    );

    let orchestrator = Arc::new(Orchestrator::bootstrap(&settings)?);

    info!("Orchestrator initialized, starting API server");

    start_server(orchestrator, settings.port).await?;

    Ok(())
}
