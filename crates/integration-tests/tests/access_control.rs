//! Token handling and the admin gate.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use secrecy::SecretString;
use serde_json::json;

use careveli_api::services::auth::TokenSigner;
use careveli_core::{Role, UserId};
use careveli_integration_tests::{PASSWORD, TestApp};

const ADMIN_ROUTES: [&str; 5] = [
    "/api/order/list",
    "/api/order/status",
    "/api/product/add",
    "/api/product/remove",
    "/api/product/single",
];

#[tokio::test]
async fn test_missing_token_is_not_authorized() {
    let app = TestApp::new();

    let response = app
        .send(Method::POST, "/api/cart/get", None, Some(json!({})))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.body,
        json!({ "success": false, "message": "Not Authorized" })
    );
}

#[tokio::test]
async fn test_user_token_never_passes_admin_gate() {
    let app = TestApp::new();
    let token = app.register("asha@example.com").await;

    for route in ADMIN_ROUTES {
        let response = app.post(route, &token, json!({})).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED, "{route}");
        assert_eq!(response.body["message"], "Not Authorized", "{route}");
    }
}

#[tokio::test]
async fn test_admin_claim_signed_with_other_secret_is_rejected() {
    let app = TestApp::new();
    let forged = TokenSigner::new(
        SecretString::from("some-other-secret-that-is-long-enough"),
        Duration::from_secs(3600),
    )
    .issue(UserId::new(1), Role::Admin)
    .unwrap();

    let response = app.post("/api/order/list", &forged, json!({})).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_role_is_rejected() {
    let app = TestApp::new();
    let token = app.register("asha@example.com").await;

    // Swap the payload for one claiming admin, keeping the user signature
    let mut parts = token.split('.');
    let (header, _, signature) = (
        parts.next().unwrap(),
        parts.next().unwrap(),
        parts.next().unwrap(),
    );
    let admin_payload =
        URL_SAFE_NO_PAD.encode(r#"{"sub":1,"role":"Admin","iat":0,"exp":9999999999}"#);
    let tampered = format!("{header}.{admin_payload}.{signature}");

    let response = app.post("/api/order/list", &tampered, json!({})).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_token_passes_gate() {
    let app = TestApp::new();
    let token = app.admin_token().await;

    let response = app.post("/api/order/list", &token, json!({})).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({ "success": true, "data": [] }));
}

#[tokio::test]
async fn test_bearer_authorization_header_is_accepted() {
    let app = TestApp::new();
    let token = app.register("asha@example.com").await;

    for value in [format!("Bearer {token}"), token.clone()] {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/cart/get")
            .header("authorization", value)
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.dispatch(request).await.status, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_shopper_cannot_use_admin_login() {
    let app = TestApp::new();
    app.register("asha@example.com").await;

    let response = app
        .send(
            Method::POST,
            "/api/user/admin",
            None,
            Some(json!({ "email": "asha@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["message"], "Invalid credentials");
}

#[tokio::test]
async fn test_login_and_duplicate_registration() {
    let app = TestApp::new();
    app.register("asha@example.com").await;

    let login = app
        .send(
            Method::POST,
            "/api/user/login",
            None,
            Some(json!({ "email": "asha@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(login.status, StatusCode::OK);
    assert!(login.body["data"]["token"].is_string());

    let wrong = app
        .send(
            Method::POST,
            "/api/user/login",
            None,
            Some(json!({ "email": "asha@example.com", "password": "nope-nope-nope" })),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let duplicate = app
        .send(
            Method::POST,
            "/api/user/register",
            None,
            Some(json!({ "name": "Again", "email": "ASHA@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_malformed_json_gets_an_envelope() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/user/login")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.dispatch(request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["success"], false);
}

