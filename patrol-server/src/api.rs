//! Admin API process. The REST surface for managing accounts/devices/
//! watchers is explicitly out of scope for this rewrite (§1 Non-goals);
//! this binds just enough of Axum to give the process a liveness probe a
//! deployment's load balancer or orchestrator can point at.

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let port = state.config.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "admin API listening");

    axum::serve(listener, health_router()).await?;
    Ok(())
}

/// Just `/healthz`, shared by the admin API and the `scheduler`/`worker`
/// subcommands' own liveness listener (§6: "opens an HTTP server on :8080
/// for health/pprof" — pprof itself is a Go-ism with no Rust counterpart
/// here, so only the health route is carried over).
pub fn health_router() -> Router {
    Router::new().route("/healthz", get(healthz)).layer(TraceLayer::new_for_http())
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
