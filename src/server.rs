//! HTTP trigger gateway: webhook, diagnostics, and health endpoints.

pub mod diagnostics;
pub mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Single-slot dispatch lock: a second webhook arriving while an upgrade
    /// runs is rejected instead of racing against the same cluster.
    pub upgrade_lock: Arc<Mutex<()>>,
}

pub async fn run(config: Config) -> Result<()> {
    let port = config.port;
    let state = AppState {
        config: Arc::new(config),
        upgrade_lock: Arc::new(Mutex::new(())),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook::handle))
        .route("/diagnostics", get(diagnostics::handle))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    Ok(())
}

async fn health() -> &'static str {
    "OK"
}
