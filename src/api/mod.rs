pub mod devices;
pub mod error;
pub mod health;
pub mod response;

use axum::routing::{get, post};
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::supervisor::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/devices", get(devices::list_devices))
        .route("/devices/:host/tree", get(devices::device_tree))
        .route("/devices/:host/power-limit", post(devices::set_power_limit));

    Router::new()
        .route("/healthz", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
