use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use webshot::auth::{PolicyAuthorizer, TokenAuthenticator};
use webshot::config::ServiceConfig;
use webshot::server::{self, AppState};
use webshot::session::SessionOrchestrator;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::parse();

    // Also installs the `log` bridge so library records reach the subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let root_key = config.verification_key().context("loading verification key")?;

    // The service cannot serve without a browser, so launch before binding.
    let engine_config = config.engine_config();
    let engine = Arc::new(
        webshot::async_api::launch_engine(engine_config.clone())
            .await
            .context("launching headless browser")?,
    );

    let orchestrator = SessionOrchestrator::new(engine.clone(), engine_config.load_timeout());
    let state = AppState::new(
        TokenAuthenticator::new(root_key),
        PolicyAuthorizer::new(config.evaluation_limits()),
        orchestrator,
    );

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("binding {}", config.bind_address()))?;

    server::serve(listener, state, shutdown_signal())
        .await
        .context("serving requests")?;

    // The router (and every orchestrator clone) is gone once serve returns.
    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.shutdown()?,
        Err(_) => log::warn!("Browser still referenced at shutdown; leaving it to process exit"),
    }
    log::info!("Stopped");
    Ok(())
}
