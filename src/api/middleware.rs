//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error type and its status mapping
//! - Bearer token authentication

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::db::repositories::{
    SessionStore, SqlxAccessTokenRepository, SqlxDeviceRepository, SqlxSessionStore,
    SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::services::{
    AccountError, AccountService, DeviceRegistry, DynClock, LinkError, LinkHandshake,
    SessionIssuer, SessionReaper,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub session_store: Arc<dyn SessionStore>,
    pub issuer: Arc<SessionIssuer>,
    pub handshake: Arc<LinkHandshake>,
    pub registry: Arc<DeviceRegistry>,
    pub accounts: Arc<AccountService>,
}

impl AppState {
    /// Wire every service over one pool and clock
    pub fn new(pool: DynDatabasePool, clock: DynClock, config: &Config) -> Self {
        let link = &config.link;
        let store_timeout = link.store_timeout();

        let session_store = SqlxSessionStore::boxed(pool.clone(), link.sweep_grace());
        let registry = Arc::new(DeviceRegistry::new(
            SqlxDeviceRepository::boxed(pool.clone()),
            clock.clone(),
            store_timeout,
        ));
        let handshake = Arc::new(LinkHandshake::new(
            session_store.clone(),
            registry.clone(),
            clock.clone(),
            store_timeout,
        ));
        let issuer = Arc::new(SessionIssuer::new(session_store.clone(), clock.clone(), link));
        let accounts = Arc::new(AccountService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxAccessTokenRepository::boxed(pool.clone()),
            clock,
            chrono::Duration::hours(config.auth.token_ttl_hours),
            store_timeout,
        ));

        Self {
            pool,
            session_store,
            issuer,
            handshake,
            registry,
            accounts,
        }
    }

    /// Build the background reaper over the same store and accounts
    pub fn reaper(&self, clock: DynClock, config: &Config) -> SessionReaper {
        SessionReaper::new(
            self.session_store.clone(),
            self.accounts.clone(),
            clock,
            config.link.sweep_grace(),
            config.link.store_timeout(),
        )
    }
}

/// Raw bearer token of the current request, kept for logout
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Error response body: `{"detail": ..., "code": ...}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub detail: String,
    pub code: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            code: code.into(),
        }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", detail)
    }

    pub fn validation_error(detail: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new("CONFLICT", detail)
    }

    pub fn storage_unavailable() -> Self {
        Self::new(
            "STORAGE_UNAVAILABLE",
            "Storage is temporarily unavailable, please retry",
        )
    }

    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "NOT_FOUND" | "SESSION_EXPIRED_OR_UNKNOWN" => StatusCode::NOT_FOUND,
            "SESSION_ALREADY_CLAIMED" | "CONFLICT" => StatusCode::CONFLICT,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "STORAGE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<LinkError> for ApiError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::SessionExpiredOrUnknown => Self::new(
                "SESSION_EXPIRED_OR_UNKNOWN",
                "Link session has expired or does not exist",
            ),
            LinkError::SessionAlreadyClaimed => Self::new(
                "SESSION_ALREADY_CLAIMED",
                "Link session has already been used",
            ),
            LinkError::NotFound => Self::not_found("Device not found"),
            LinkError::Unauthorized => Self::unauthorized("Authentication required"),
            LinkError::Storage(e) => {
                tracing::warn!(error = %e, "Storage failure");
                Self::storage_unavailable()
            }
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Validation(msg) => Self::validation_error(msg),
            AccountError::Conflict(msg) => Self::conflict(msg),
            AccountError::Unauthorized(msg) => Self::unauthorized(msg),
            AccountError::Storage(e) => {
                tracing::warn!(error = %e, "Storage failure");
                Self::storage_unavailable()
            }
        }
    }
}

/// Unwrap a JSON body, reporting malformed input as a validation error
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::validation_error(rejection.body_text()))
}

/// Extract a bearer token from the Authorization header
fn extract_bearer_token(request: &Request) -> Option<String> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Authentication middleware.
///
/// Resolves the bearer token and inserts the caller's `AuthClaim` into the
/// request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&request)
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let claim = state.accounts.resolve(&token).await?;

    request.extensions_mut().insert(claim);
    request.extensions_mut().insert(BearerToken(token));
    Ok(next.run(request).await)
}
