//! HTTP surface (§6 EXTERNAL INTERFACES): the axum service that exposes
//! every other crate in this workspace over the wire. Grounded in the
//! broader example pack's convention for an `axum`+`tower-http` agent
//! backend (`other_examples/manifests/EffortlessMetrics-agent-backplane`,
//! `other_examples/manifests/pegasusheavy-safe-agent`) since no crate in
//! the teacher itself serves HTTP.

pub mod auth;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use backend_common::AppConfig;
use state::AppState;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::auth::router())
        .merge(routes::sessions::router())
        .merge(routes::chat::router())
        .merge(routes::files::router())
        .merge(routes::dav::router())
        .merge(routes::admin::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_main() -> anyhow::Result<()> {
    backend_common::logging::init();

    let config = AppConfig::from_env();
    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    let state = AppState::build(config).await?;

    let removed = state.uploads.cleanup_stale().await?;
    if removed > 0 {
        tracing::info!(removed, "swept stale chunked-upload sessions at startup");
    }
    if let Err(err) = state.orchestrator.reconcile_on_startup().await {
        tracing::error!(%err, "validation startup reconciliation failed");
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
