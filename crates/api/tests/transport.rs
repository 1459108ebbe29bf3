//! Integration tests for the HTTP surface: the WebSocket upgrade guard,
//! `/health` and the middleware stack.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

use common::{body_json, TestApp};

// ---------------------------------------------------------------------------
// Test: the WebSocket upgrade checks the token first
// ---------------------------------------------------------------------------

#[tokio::test]
async fn websocket_upgrade_rejects_bad_tokens() {
    let app = TestApp::new();

    let response = app.get("/api/v1/ws?token=garbage").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");

    let response = app.get("/api/v1/ws").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(app.pipeline.sessions.connection_count(), 0);
}

#[tokio::test]
async fn websocket_valid_token_still_needs_an_upgrade() {
    let app = TestApp::new();

    // Authorization passes; a plain GET is then refused and nothing is
    // attached.
    let uri = format!("/api/v1/ws?token={}", app.token(7));
    let response = app.get(&uri).await;

    assert!(response.status().is_client_error());
    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.pipeline.sessions.connection_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: /health reports the database and open connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_degraded_database_and_connections() {
    let app = TestApp::new();
    let _session = app.pipeline.sessions.attach(7);

    let response = app.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["db_healthy"], false);
    assert_eq!(json["connections"], 1);
    assert!(json["version"].is_string());
}

// ---------------------------------------------------------------------------
// Test: responses carry a request id; unknown routes are 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn responses_carry_request_id() {
    let app = TestApp::new();

    let response = app.get("/health").await;
    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = TestApp::new();

    let response = app.get("/api/v1/notifications").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: CORS preflight admits only GET from configured origins
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cors_preflight_allows_get_from_configured_origin() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/v1/ws")
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();

    let response = app.router().oneshot(request).await.unwrap();

    let headers = response.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        "http://localhost:5173"
    );
    assert_eq!(headers["access-control-allow-methods"], "GET");
}
