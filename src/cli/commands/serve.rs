use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;

use crate::app::{self, AppState};
use crate::auth::PasswordHasher;
use crate::config::AppConfig;
use crate::database::bootstrap;

use super::open_store;

pub async fn handle(config: AppConfig, port: Option<u16>) -> anyhow::Result<()> {
    tracing::info!("Starting useradmin-api in {:?} mode", config.environment);

    let store = open_store(&config).await?;
    let hasher = PasswordHasher::new(config.security.bcrypt_cost);
    bootstrap::run(store.as_ref(), &hasher, &config.bootstrap).await?;

    let bind_addr = format!(
        "{}:{}",
        config.server.bind_host,
        port.unwrap_or(config.server.port)
    );
    let state = AppState::from_config(store, config);
    // Build the login decoy hash before the first request needs it
    state.hasher.verify_decoy("").await?;
    let app = app::router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
