//! QR scan endpoint
//!
//! - POST /qr/scan - An authenticated user consumes a link session

use axum::{extract::rejection::JsonRejection, extract::State, Extension, Json};
use serde::Deserialize;

use crate::api::middleware::{json_body, ApiError, AppState};
use crate::api::responses::DeviceResponse;
use crate::models::AuthClaim;

/// Request body for a scan
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub session_id: String,
}

/// POST /qr/scan
///
/// 404 when the session is unknown or expired, 409 when it was already used.
pub async fn scan(
    State(state): State<AppState>,
    Extension(claim): Extension<AuthClaim>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let request = json_body(body)?;
    let device = state.handshake.scan(request.session_id.trim(), claim).await?;
    Ok(Json(device.into()))
}
