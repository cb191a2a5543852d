use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::supervisor::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    devices_known: usize,
}

/// GET /healthz
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let devices_known = state.devices.read().await.len();
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            devices_known,
        }),
    )
}

/// GET /health/live
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}
