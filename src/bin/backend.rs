#![forbid(unsafe_code)]

//! HTTP server for the YogaTube frontend: playlist import, video listing, the
//! daily video rotation and visitor analytics.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use yogatube::{
    api::{self, AppState},
    clock::SystemClock,
    config::load_runtime_config,
    ingest::{Ingestor, YouTubePlaylist},
    store::VideoStore,
};

const DEFAULT_LOG_FILTER: &str = "yogatube=info,backend=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = load_runtime_config().context("loading configuration")?;
    let store = VideoStore::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    info!(db = store.location(), "using database file");
    let ingestor = Ingestor::new(YouTubePlaylist::new(config.upstream.clone()));
    let state = AppState::new(Arc::new(store), ingestor, Arc::new(SystemClock));

    let app = api::router(state, &config.static_dir);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(%err, "failed to install Ctrl+C handler");
    }
}
