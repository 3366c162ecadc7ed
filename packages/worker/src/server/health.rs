use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;
use sqlx::PgPool;

use crate::kernel::circuit_breaker::{CircuitBreakers, CircuitSnapshot, CircuitState};
use crate::kernel::jobs::{WorkerPool, WorkerStatus};

#[derive(Clone)]
pub struct HealthState {
    pub worker: Arc<WorkerPool>,
    pub breakers: CircuitBreakers,
    /// `None` when running against the in-memory store
    pub db_pool: Option<PgPool>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    worker: WorkerStatus,
    circuits: Vec<CircuitSnapshot>,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: String,
    accepting_jobs: bool,
    database: DatabaseHealth,
    open_circuits: Vec<String>,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Liveness. The process answers, so it is alive; the body reports what the
/// worker is doing.
pub async fn health_handler(
    Extension(state): Extension<HealthState>,
) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            worker: state.worker.status(),
            circuits: state.breakers.snapshot(),
        }),
    )
}

/// Readiness
///
/// Checks:
/// - The worker pool is accepting jobs
/// - Database connectivity (5s timeout)
///
/// Open circuits are reported but do not fail readiness; the breaker already
/// sheds load on its own.
pub async fn ready_handler(
    Extension(state): Extension<HealthState>,
) -> (StatusCode, Json<ReadyResponse>) {
    let database = match &state.db_pool {
        None => DatabaseHealth {
            status: "not_configured".to_string(),
            error: None,
        },
        Some(pool) => match tokio::time::timeout(
            std::time::Duration::from_secs(5),
            sqlx::query("SELECT 1").execute(pool),
        )
        .await
        {
            Ok(Ok(_)) => DatabaseHealth {
                status: "ok".to_string(),
                error: None,
            },
            Ok(Err(e)) => DatabaseHealth {
                status: "error".to_string(),
                error: Some(format!("Query failed: {}", e)),
            },
            Err(_) => DatabaseHealth {
                status: "error".to_string(),
                error: Some("Query timeout (>5s)".to_string()),
            },
        },
    };

    let accepting_jobs = state.worker.status().accepting_jobs;
    let open_circuits = state
        .breakers
        .snapshot()
        .into_iter()
        .filter(|c| c.state != CircuitState::Closed)
        .map(|c| c.operation)
        .collect();

    let is_ready = accepting_jobs && database.status != "error";
    let status_code = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadyResponse {
            status: if is_ready { "ready" } else { "not_ready" }.to_string(),
            accepting_jobs,
            database,
            open_circuits,
        }),
    )
}
