//! MemoryRouter — reverse-proxy LLM gateway with persistent, time-aware
//! conversation memory (spec §0). Wires config, storage, the embedder, and
//! every route onto one axum [`Router`], then serves with graceful shutdown.

mod handlers;
mod http_error;
mod options;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use memoryrouter_core::embedder::{Embedder, HttpEmbedder};
use memoryrouter_core::orchestrator::Engine;
use memoryrouter_core::{RouterConfig, Store, VaultRegistry};
use tokio::net::TcpListener;

use crate::state::AppState;

/// Interval between `rollup_usage` sweeps (spec §4.8 "periodic rollup").
const USAGE_ROLLUP_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::var("MEMORYROUTER_CONFIG").unwrap_or_else(|_| "memoryrouter.toml".to_string());
    let cfg = RouterConfig::load(Some(std::path::Path::new(&config_path)))?;

    let store = Store::open(&cfg.db.path)?;
    let vaults = VaultRegistry::new(cfg.embedder.dims);
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(cfg.embedder.endpoint.clone(), cfg.embedder.model.clone(), cfg.embedder.dims));

    let bind_addr = format!("{}:{}", cfg.server.bind_address, cfg.server.port);
    let engine = Arc::new(Engine::new(cfg, store, vaults, embedder));

    spawn_usage_rollup(engine.clone());

    let admin_secret = std::env::var("MEMORYROUTER_ADMIN_SECRET").ok();
    let state = AppState { engine, admin_secret };

    let app = router(state);
    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("[memoryrouter] listening on http://{bind_addr} (Ctrl+C/SIGTERM to stop)");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    log::info!("[memoryrouter] stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        // OpenAI-shaped, cross-format (spec §4.6 "conversion rule").
        .route("/v1/chat/completions", post(handlers::chat::chat_completions))
        // Native non-converting endpoints (spec §4.6 "non-conversion rule").
        .route("/v1/messages", post(handlers::native::messages))
        .route("/v1/models/:model_action", post(handlers::native::generate_content))
        // Memory-free pass-through (spec §6).
        .route("/v1/embeddings", post(handlers::passthrough::embeddings))
        .route("/v1/completions", post(handlers::passthrough::completions))
        .route("/v1/audio/*rest", post(handlers::passthrough::audio))
        .route("/v1/images/*rest", post(handlers::passthrough::images))
        // Bulk import.
        .route("/v1/memory/upload", post(handlers::upload::memory_upload))
        // Admin.
        .route("/v1/admin/reembed", post(handlers::admin::reembed))
        .route("/v1/admin/clear", post(handlers::admin::clear))
        .route("/v1/admin/list", get(handlers::admin::list))
        .route("/v1/admin/debug-storage", get(handlers::admin::debug_storage))
        .route("/v1/admin/provider-keys", post(handlers::admin::upsert_provider_key).delete(handlers::admin::delete_provider_key))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Sweeps `usage_events` into daily rollups on a fixed interval (spec §4.8).
/// A short initial delay lets the process finish starting before the first
/// pass runs.
fn spawn_usage_rollup(engine: Arc<Engine>) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        loop {
            let now_ms = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0);
            match engine.store.rollup_usage(now_ms) {
                Ok(n) => log::info!("[usage-rollup] rolled up {n} events"),
                Err(e) => log::warn!("[usage-rollup] failed: {e}"),
            }
            tokio::time::sleep(Duration::from_secs(USAGE_ROLLUP_INTERVAL_SECS)).await;
        }
    });
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
    }
}
