//! Device list, published-tree dump and power-limit control surface
//! (spec.md §6.1).

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    api::{error::ApiError, response::ApiResponse},
    publish::Leaf,
    supervisor::AppState,
};

#[derive(Debug, Serialize)]
pub struct DeviceSummary {
    host: String,
    product_name: String,
    serial_number: String,
    firmware_version: String,
    logged_in: bool,
    max_power: u32,
}

/// GET /api/v1/devices
pub async fn list_devices(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<DeviceSummary>>> {
    let devices = state.devices.read().await;
    let summaries = devices
        .values()
        .map(|d| DeviceSummary {
            host: d.host_name.clone(),
            product_name: d.product_name.clone(),
            serial_number: d.serial_number.clone(),
            firmware_version: d.firmware_version.clone(),
            logged_in: d.logged_in,
            max_power: d.max_power,
        })
        .collect();
    Json(ApiResponse::success(summaries))
}

/// GET /api/v1/devices/:host/tree
pub async fn device_tree(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<ApiResponse<std::collections::HashMap<String, Leaf>>>, ApiError> {
    if !state.devices.read().await.contains_key(&host) {
        return Err(ApiError::NotFound(host));
    }
    let tree = state.publisher.subtree(&host).await;
    Ok(Json(ApiResponse::success(tree)))
}

#[derive(Debug, Deserialize)]
pub struct PowerLimitRequest {
    pub watts: u32,
}

/// POST /api/v1/devices/:host/power-limit
pub async fn set_power_limit(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(req): Json<PowerLimitRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let max_power = state
        .devices
        .read()
        .await
        .get(&host)
        .map(|d| d.max_power)
        .ok_or_else(|| ApiError::NotFound(host.clone()))?;

    state
        .arbiter
        .request_power_limit(&host, req.watts, max_power)
        .await?;

    Ok(Json(ApiResponse::success(())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn power_limit_for_unknown_device_is_not_found() {
        let state = AppState::new(AppConfig::default());
        let err = set_power_limit(
            State(state),
            Path("10.0.0.9".to_string()),
            Json(PowerLimitRequest { watts: 1000 }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
