//! Link session API endpoints
//!
//! Used by the client that wants to be linked:
//! - POST /sessions - Issue a session and its QR payload
//! - GET /sessions/{session_id} - Poll the session state
//! - POST /sessions/{session_id}/cancel - Abandon the session

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::models::SessionStatus;

/// Optional request body for issuing a session
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub device_name: Option<String>,
}

/// Response for a newly issued session
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    /// Text to render as the QR code
    pub qr_payload: String,
    pub expires_at: String,
}

/// Response for session polling
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub expires_at: String,
}

/// Build the session router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/{session_id}", get(get_session))
        .route("/{session_id}/cancel", post(cancel_session))
}

/// POST /sessions
///
/// The body is optional; an empty body issues an unnamed session.
async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::validation_error(format!("Invalid request body: {}", e)))?
    };

    let issued = state.issuer.create_session_for(request.device_name).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: issued.session.id,
            qr_payload: issued.payload.encode(),
            expires_at: issued.session.expires_at.to_rfc3339(),
        }),
    ))
}

/// GET /sessions/{session_id}
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let session = state.handshake.status(&session_id).await?;

    Ok(Json(SessionStatusResponse {
        session_id: session.id,
        status: session.status,
        expires_at: session.expires_at.to_rfc3339(),
    }))
}

/// POST /sessions/{session_id}/cancel
async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.handshake.cancel(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
