use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse::ok("Server is running"))
}

/// Readiness check endpoint. Ready while the room registry answers.
pub async fn ready_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    debug!("Readiness check requested");
    match state.registry.stats().await {
        Some(_) => (StatusCode::OK, Json(HealthResponse::ok("Service is ready"))),
        None => {
            warn!("Readiness check failed: registry is not running");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::unavailable("Room registry is not running")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_is_always_ok() {
        let Json(body) = health_check().await;
        assert_eq!(body, HealthResponse::ok("Server is running"));
    }
}
