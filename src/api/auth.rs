//! Authentication API endpoints
//!
//! Handles HTTP requests for accounts:
//! - POST /auth/register - Create an account
//! - POST /auth/login - Exchange credentials for a bearer token
//! - GET /auth/me - Current account
//! - POST /auth/logout - Invalidate the current token

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{json_body, ApiError, AppState, BearerToken};
use crate::api::responses::UserResponse;
use crate::models::AuthClaim;
use crate::services::{LoginInput, RegisterInput};

/// Request body for registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    #[serde(alias = "username_or_email")]
    pub username: String,
    pub password: String,
}

/// Response for a successful login
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserResponse,
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_current_user))
        .route("/logout", post(logout))
}

/// POST /auth/register
async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let body = json_body(body)?;
    let user = state
        .accounts
        .register(RegisterInput::new(body.username, body.email, body.password))
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// POST /auth/login
async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let body = json_body(body)?;
    let (token, user) = state
        .accounts
        .login(LoginInput::new(body.username, body.password))
        .await?;

    Ok(Json(LoginResponse {
        access_token: token.token,
        token_type: "bearer".to_string(),
        user: user.into(),
    }))
}

/// GET /auth/me
async fn get_current_user(
    State(state): State<AppState>,
    Extension(claim): Extension<AuthClaim>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.accounts.get_user(claim.user_id).await?;
    Ok(Json(user.into()))
}

/// POST /auth/logout
async fn logout(
    State(state): State<AppState>,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> Result<StatusCode, ApiError> {
    state.accounts.logout(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}
