use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::api::v1::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    sites: usize,
}

/// GET /health - reports overall liveness and the number of managed sites.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let sites = state.list_sites().len();
    let response = HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        sites,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready - readiness probe, healthy once at least one site is registered.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.list_sites().is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// GET /health/live - liveness probe for orchestrators.
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn readiness_is_unavailable_with_no_sites() {
        let supervisor = Arc::new(crate::supervisor::MultiSiteSupervisor::new());
        let status = readiness_check(State(supervisor)).await.into_response().status();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
