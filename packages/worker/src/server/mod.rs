//! Liveness and readiness endpoints for the worker process.

pub mod health;

use anyhow::{Context, Result};
use axum::{routing::get, Extension, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub use health::HealthState;

pub fn build_app(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::ready_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Serve the health endpoints until `shutdown` is cancelled.
pub async fn serve_health(state: HealthState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health server to {}", addr))?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Health server failed")
}
