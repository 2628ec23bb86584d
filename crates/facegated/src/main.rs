use std::sync::Arc;

use anyhow::{Context, Result};
use facegate_core::{Config, FaceStore, OnnxFaceEncoder};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod api;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facegated starting");

    let config = Config::load()?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        data_dir = %config.data_dir.display(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    // Missing model files are fatal.
    let encoder = OnnxFaceEncoder::load(&config.model_dir).context("loading face models")?;
    let engine = engine::spawn_engine(Box::new(encoder)).context("spawning engine thread")?;

    let store = FaceStore::open(&config.data_dir).context("opening face store")?;

    let state = api::AppState {
        engine,
        store: Arc::new(Mutex::new(store)),
        match_threshold: config.match_threshold,
        models_loaded: true,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "facegated ready");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("facegated shutting down");
        })
        .await?;

    Ok(())
}
