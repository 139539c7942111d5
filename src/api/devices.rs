//! Device management API endpoints
//!
//! - GET /devices - List the caller's devices, oldest first
//! - GET /devices/{device_id} - Get one device
//! - DELETE /devices/{device_id} - Revoke a device

use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::DeviceResponse;
use crate::models::AuthClaim;

/// Build the device router (requires auth middleware)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_devices))
        .route("/{device_id}", get(get_device).delete(revoke_device))
}

/// GET /devices
async fn list_devices(
    State(state): State<AppState>,
    Extension(claim): Extension<AuthClaim>,
) -> Result<Json<Vec<DeviceResponse>>, ApiError> {
    let devices = state.registry.list(claim.user_id).await?;
    Ok(Json(devices.into_iter().map(DeviceResponse::from).collect()))
}

/// GET /devices/{device_id}
async fn get_device(
    State(state): State<AppState>,
    Extension(claim): Extension<AuthClaim>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let device = state.registry.get(claim.user_id, &device_id).await?;
    Ok(Json(device.into()))
}

/// DELETE /devices/{device_id}
///
/// Revoking an already revoked device returns it unchanged.
async fn revoke_device(
    State(state): State<AppState>,
    Extension(claim): Extension<AuthClaim>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let device = state.registry.revoke(claim.user_id, &device_id).await?;
    Ok(Json(device.into()))
}
