//! Liveness, readiness and metrics endpoints.

use super::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

/// Overall readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Nothing waiting on an operator
    Healthy,
    /// Serving, but compensations or refunds need manual reconciliation
    Degraded,
}

/// Readiness report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    /// Overall status
    pub status: HealthStatus,
    /// Events being served
    pub events: usize,
    /// Operations waiting for manual reconciliation
    pub dead_letters: usize,
}

/// `GET /health`
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// `GET /health/ready`
///
/// Dead letters degrade the report but never fail it: the engine keeps serving.
pub async fn readiness(State(state): State<AppState>) -> Json<Readiness> {
    let dead_letters = state.engine.dead_letters().len();
    let status = if dead_letters == 0 {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    Json(Readiness {
        status,
        events: state.engine.list_events().await.len(),
        dead_letters,
    })
}

/// `GET /metrics`
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}
