pub mod adapters;
pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod ports;
pub mod push;
pub mod state;
pub mod store;
pub mod types;

use std::sync::Arc;

use crate::auth::UsersFile;
use crate::config::AppConfig;
use crate::error::StartupError;
use crate::store::SqliteStore;

/// Opens the store and key pair under the data directory, starts delivery
/// and serves the HTTP API until Ctrl-C.
pub async fn serve(config: AppConfig) -> Result<(), StartupError> {
    let store = Arc::new(SqliteStore::open(&config.store_path()).await?);
    let service = push::start(&config.push, &config.data_dir, Arc::clone(&store)).await?;
    let state = state::AppState {
        push: service.clone(),
        verifier: Arc::new(UsersFile::load(&config.users_file)),
    };

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.bind,
            source,
        })?;
    tracing::info!(addr = %config.bind, "listening");

    let result = axum::serve(listener, app::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve);
    service.shutdown();
    store.close().await;
    result
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
