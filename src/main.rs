use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use ragchat_backend::core::config::{AppPaths, ConfigService};
use ragchat_backend::core::logging;
use ragchat_backend::server;
use ragchat_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` values win over the process environment.
    let _ = dotenvy::dotenv_override();

    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    let config_service = ConfigService::new(paths.clone());
    if let Ok(raw) = config_service.load_raw() {
        tracing::debug!(
            config = %config_service.redact_sensitive_values(&raw),
            "Effective configuration"
        );
    }

    let state = AppState::initialize(paths)
        .await
        .context("Failed to initialize application state")?;

    let bind_addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on {}", addr);

    let app = server::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
