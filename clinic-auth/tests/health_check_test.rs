mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;

#[tokio::test]
async fn health_check_reports_service_and_otp_mode() {
    let app = TestApp::new().await;

    let response = app.send(Method::GET, "/health", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["service"], "clinic-auth");
    assert_eq!(response.body["checks"]["otp_mode"], "Live");
}

#[tokio::test]
async fn responses_carry_security_headers_and_request_id() {
    let app = TestApp::new().await;

    let response = app.send(Method::GET, "/health", None, None).await;

    assert_eq!(response.headers["x-content-type-options"], "nosniff");
    assert_eq!(response.headers["x-frame-options"], "DENY");
    assert_eq!(response.headers["cache-control"], "no-store");
    assert!(response.headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::new().await;

    let response = app.send(Method::GET, "/auth/nowhere", None, None).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
