//! API layer - HTTP handlers and routing
//!
//! This module contains all HTTP endpoints of the link service:
//! - Link session endpoints (issuing client)
//! - QR scan endpoint (authenticated scanner)
//! - Device management endpoints
//! - Account endpoints
//! - Health check

pub mod auth;
pub mod devices;
pub mod middleware;
pub mod responses;
pub mod scan;
pub mod sessions;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, BearerToken};

/// Build the API routes
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Protected routes (need a bearer token)
    let protected_routes = Router::new()
        .route("/qr/scan", post(scan::scan))
        .nest("/devices", devices::router())
        .nest("/auth", auth::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .route("/health", get(health))
        .nest("/sessions", sessions::router())
        .nest("/auth", auth::public_router())
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allow_origin(cors_origin))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    build_api_router(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `*` allows any origin; otherwise a comma-separated list of origins
fn allow_origin(cors_origin: &str) -> AllowOrigin {
    if cors_origin.trim() == "*" {
        return AllowOrigin::from(Any);
    }

    let origins: Vec<HeaderValue> = cors_origin
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    AllowOrigin::list(origins)
}

/// GET /health
async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.pool.ping().await.map_err(|e| {
        tracing::warn!(error = %e, "Health check failed");
        ApiError::storage_unavailable()
    })?;
    Ok(Json(json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{create_test_pool, migrations};
    use crate::services::ManualClock;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    struct TestApp {
        server: TestServer,
        clock: Arc<ManualClock>,
    }

    async fn test_app() -> TestApp {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = AppState::new(pool, clock.clone(), &Config::default());
        let server =
            TestServer::new(build_router(state, "*")).expect("Failed to start test server");
        TestApp { server, clock }
    }

    /// Register and log in, returning the bearer token
    async fn login_as(server: &TestServer, username: &str) -> String {
        let response = server
            .post("/auth/register")
            .json(&json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": "correct horse",
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let response = server
            .post("/auth/login")
            .json(&json!({ "username": username, "password": "correct horse" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["token_type"], "bearer");
        body["access_token"].as_str().unwrap().to_string()
    }

    async fn new_session(server: &TestServer, device_name: Option<&str>) -> String {
        let request = server.post("/sessions");
        let response = match device_name {
            Some(name) => request.json(&json!({ "device_name": name })).await,
            None => request.await,
        };
        assert_eq!(response.status_code(), StatusCode::CREATED);
        let body: Value = response.json();
        body["session_id"].as_str().unwrap().to_string()
    }

    async fn scan(server: &TestServer, token: &str, session_id: &str) -> axum_test::TestResponse {
        server
            .post("/qr/scan")
            .authorization_bearer(token)
            .json(&json!({ "session_id": session_id }))
            .await
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let response = app.server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_session_response() {
        let app = test_app().await;
        let response = app
            .server
            .post("/sessions")
            .json(&json!({ "device_name": "Office PC" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let body: Value = response.json();
        let session_id = body["session_id"].as_str().unwrap();
        assert_eq!(session_id.len(), 22);

        let payload: Value = serde_json::from_str(body["qr_payload"].as_str().unwrap()).unwrap();
        assert_eq!(payload["session_id"], session_id);
        assert_eq!(payload["expires_at"], body["expires_at"]);
    }

    #[tokio::test]
    async fn test_create_session_rejects_malformed_body() {
        let app = test_app().await;
        let response = app
            .server
            .post("/sessions")
            .bytes("{not json".into())
            .content_type("application/json")
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["detail"].is_string());
    }

    #[tokio::test]
    async fn test_scan_links_device() {
        let app = test_app().await;
        let token = login_as(&app.server, "alice").await;
        let session_id = new_session(&app.server, Some("Laptop")).await;

        let response = scan(&app.server, &token, &session_id).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let device: Value = response.json();
        assert_eq!(device["device_name"], "Laptop");
        assert_eq!(device["is_active"], true);
        assert!(device["device_id"].is_string());
        assert!(device["created_at"].is_string());
        assert!(device["last_active"].is_string());

        let status: Value = app.server.get(&format!("/sessions/{}", session_id)).await.json();
        assert_eq!(status["status"], "completed");
    }

    #[tokio::test]
    async fn test_scan_requires_token() {
        let app = test_app().await;
        let session_id = new_session(&app.server, None).await;

        let response = app
            .server
            .post("/qr/scan")
            .json(&json!({ "session_id": session_id }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert!(response.json::<Value>()["detail"].is_string());

        let response = scan(&app.server, "not-a-real-token", &session_id).await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_scan_unknown_session_is_404() {
        let app = test_app().await;
        let token = login_as(&app.server, "alice").await;

        let response = scan(&app.server, &token, "AAAAAAAAAAAAAAAAAAAAAA").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["code"], "SESSION_EXPIRED_OR_UNKNOWN");
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_scan_at_119_then_replay_at_130_is_409() {
        let app = test_app().await;
        let token = login_as(&app.server, "alice").await;
        let session_id = new_session(&app.server, None).await;

        app.clock.advance(Duration::seconds(119));
        assert_eq!(scan(&app.server, &token, &session_id).await.status_code(), StatusCode::OK);

        app.clock.advance(Duration::seconds(11));
        let response = scan(&app.server, &token, &session_id).await;
        assert_eq!(response.status_code(), StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["code"], "SESSION_ALREADY_CLAIMED");
    }

    #[tokio::test]
    async fn test_scan_after_ttl_is_404() {
        let app = test_app().await;
        let token = login_as(&app.server, "alice").await;
        let session_id = new_session(&app.server, None).await;

        app.clock.advance(Duration::seconds(121));
        let response = scan(&app.server, &token, &session_id).await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

        let devices: Vec<Value> = app
            .server
            .get("/devices")
            .authorization_bearer(&token)
            .await
            .json();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_session_cannot_be_scanned() {
        let app = test_app().await;
        let token = login_as(&app.server, "alice").await;
        let session_id = new_session(&app.server, None).await;

        let response = app
            .server
            .post(&format!("/sessions/{}/cancel", session_id))
            .await;
        assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

        let response = scan(&app.server, &token, &session_id).await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_device_list_preserves_order_and_revocation() {
        let app = test_app().await;
        let token = login_as(&app.server, "alice").await;

        let a = new_session(&app.server, Some("A")).await;
        let a_device: Value = scan(&app.server, &token, &a).await.json();
        app.clock.advance(Duration::seconds(1));
        let b = new_session(&app.server, Some("B")).await;
        let b_device: Value = scan(&app.server, &token, &b).await.json();

        let b_id = b_device["device_id"].as_str().unwrap();
        let revoked = app
            .server
            .delete(&format!("/devices/{}", b_id))
            .authorization_bearer(&token)
            .await;
        assert_eq!(revoked.status_code(), StatusCode::OK);
        assert_eq!(revoked.json::<Value>()["is_active"], false);

        let devices: Vec<Value> = app
            .server
            .get("/devices")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["device_id"], a_device["device_id"]);
        assert_eq!(devices[0]["is_active"], true);
        assert_eq!(devices[1]["device_id"], b_device["device_id"]);
        assert_eq!(devices[1]["is_active"], false);

        // Revoking again is not an error
        let again = app
            .server
            .delete(&format!("/devices/{}", b_id))
            .authorization_bearer(&token)
            .await;
        assert_eq!(again.status_code(), StatusCode::OK);
        assert_eq!(again.json::<Value>()["is_active"], false);
    }

    #[tokio::test]
    async fn test_revoke_foreign_or_unknown_device_is_404() {
        let app = test_app().await;
        let alice = login_as(&app.server, "alice").await;
        let mallory = login_as(&app.server, "mallory").await;

        let session_id = new_session(&app.server, None).await;
        let device: Value = scan(&app.server, &alice, &session_id).await.json();
        let device_id = device["device_id"].as_str().unwrap();

        let response = app
            .server
            .delete(&format!("/devices/{}", device_id))
            .authorization_bearer(&mallory)
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

        let response = app
            .server
            .delete("/devices/00000000-0000-0000-0000-000000000000")
            .authorization_bearer(&alice)
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

        let still_active: Value = app
            .server
            .get(&format!("/devices/{}", device_id))
            .authorization_bearer(&alice)
            .await
            .json();
        assert_eq!(still_active["is_active"], true);
    }

    #[tokio::test]
    async fn test_auth_flow() {
        let app = test_app().await;
        let token = login_as(&app.server, "alice").await;

        let me = app.server.get("/auth/me").authorization_bearer(&token).await;
        assert_eq!(me.status_code(), StatusCode::OK);
        let me: Value = me.json();
        assert_eq!(me["username"], "alice");
        assert!(me.get("password_hash").is_none());

        let response = app
            .server
            .post("/auth/logout")
            .authorization_bearer(&token)
            .await;
        assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

        let me = app.server.get("/auth/me").authorization_bearer(&token).await;
        assert_eq!(me.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_errors() {
        let app = test_app().await;
        login_as(&app.server, "alice").await;

        let duplicate = app
            .server
            .post("/auth/register")
            .json(&json!({ "username": "alice", "email": "other@example.com", "password": "x" }))
            .await;
        assert_eq!(duplicate.status_code(), StatusCode::CONFLICT);

        let invalid = app
            .server
            .post("/auth/register")
            .json(&json!({ "username": "bob", "email": "no-at-sign", "password": "x" }))
            .await;
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

        let bad_login = app
            .server
            .post("/auth/login")
            .json(&json!({ "username": "alice", "password": "wrong" }))
            .await;
        assert_eq!(bad_login.status_code(), StatusCode::UNAUTHORIZED);
        assert!(bad_login.json::<Value>()["detail"].is_string());
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_configured_origin() {
        use axum::body::Body;
        use tower::ServiceExt;

        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = AppState::new(pool, clock, &Config::default());
        let app = build_router(state, "https://app.example");

        let request = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/sessions")
            .header(header::ORIGIN, "https://app.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://app.example"
        );
    }

    #[test]
    fn test_allow_origin_parsing() {
        // Invalid entries are skipped rather than panicking
        let _ = allow_origin("https://a.example, https://b.example");
        let _ = allow_origin("*");
        let _ = allow_origin("bad\norigin");
    }
}
