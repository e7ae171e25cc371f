mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::{json, Value};

fn signup(email: &str) -> Value {
    json!({
        "name": "Aziz Karimov",
        "email": email,
        "phone": "+998901112233",
        "password": "branch-admin-pass",
        "telegram": "777"
    })
}

async fn submit(app: &TestApp, email: &str) -> String {
    let response = app.post("/auth/admin-requests", signup(email)).await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["status"], "pending");
    assert!(response.body.get("secret_hash").is_none());
    response.body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn approved_applicant_can_sign_in_as_branch_admin() {
    let app = TestApp::new().await;
    let id = submit(&app, "aziz@clinic.uz").await;

    let pending = app.get_as("/auth/admin-requests", &app.admin_token).await;
    assert_eq!(pending.status, StatusCode::OK);
    assert_eq!(pending.body.as_array().unwrap().len(), 1);

    let approved = app
        .post_as(
            &format!("/auth/admin-requests/{}/approve", id),
            json!({}),
            &app.admin_token,
        )
        .await;
    assert_eq!(approved.status, StatusCode::OK);
    assert_eq!(approved.body["request"]["status"], "approved");
    assert!(approved.body["identity_id"].is_u64());
    assert!(approved.body.get("token").is_none());
    assert!(app
        .gateway
        .sent()
        .iter()
        .any(|n| n.channel_id == "777"));

    let login = app
        .post(
            "/auth/login/password",
            json!({
                "identifier": "aziz@clinic.uz",
                "password": "branch-admin-pass",
                "role": "branch_admin"
            }),
        )
        .await;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.body["role"], "branch_admin");
    assert_eq!(login.body["token"]["kind"], "admin");

    let empty = app.get_as("/auth/admin-requests", &app.admin_token).await;
    assert!(empty.body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn decided_requests_cannot_be_decided_again() {
    let app = TestApp::new().await;
    let id = submit(&app, "aziz@clinic.uz").await;

    let rejected = app
        .post_as(
            &format!("/auth/admin-requests/{}/reject", id),
            json!({}),
            &app.admin_token,
        )
        .await;
    assert_eq!(rejected.status, StatusCode::OK);
    assert_eq!(rejected.body["status"], "rejected");

    for action in ["approve", "reject"] {
        let again = app
            .post_as(
                &format!("/auth/admin-requests/{}/{}", id, action),
                json!({}),
                &app.admin_token,
            )
            .await;
        assert_eq!(again.status, StatusCode::CONFLICT);
    }

    let login = app
        .post(
            "/auth/login/password",
            json!({
                "identifier": "aziz@clinic.uz",
                "password": "branch-admin-pass",
                "role": "branch_admin"
            }),
        )
        .await;
    assert_eq!(login.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .post_as(
            &format!("/auth/admin-requests/{}/approve", uuid::Uuid::new_v4()),
            json!({}),
            &app.admin_token,
        )
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_signup_conflicts() {
    let app = TestApp::new().await;
    submit(&app, "aziz@clinic.uz").await;

    let duplicate = app
        .post("/auth/admin-requests", signup("aziz@clinic.uz"))
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let existing_admin = app
        .post("/auth/admin-requests", signup(SUPER_ADMIN_EMAIL))
        .await;
    assert_eq!(existing_admin.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_signup_fails_validation() {
    let app = TestApp::new().await;

    let mut body = signup("aziz@clinic.uz");
    body["password"] = json!("short");

    let response = app.post("/auth/admin-requests", body).await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn review_requires_a_global_admin() {
    let app = TestApp::new().await;
    let id = submit(&app, "aziz@clinic.uz").await;

    let anonymous = app
        .send(
            axum::http::Method::GET,
            "/auth/admin-requests",
            None,
            None,
        )
        .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let staff = app
        .post(
            "/auth/login/password",
            json!({ "identifier": STAFF_EMAIL, "password": STAFF_PASSWORD, "role": "staff" }),
        )
        .await;
    let staff_token = staff.body["token"]["token"].as_str().unwrap();

    let forbidden = app
        .post_as(
            &format!("/auth/admin-requests/{}/approve", id),
            json!({}),
            staff_token,
        )
        .await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
}
