mod common;

use axum::http::StatusCode;
use axum_test::TestResponse;
use chrono::Duration;
use common::{TEST_PASSWORD, TestApp, spawn_app};
use manna_services::mail::extract_reset_code;
use manna_services::users::{Realm, UserStorage};
use serde_json::{Value, json};

const EMAIL: &str = "user@example.com";

/// Requests a reset and returns `(reset token, mailed code)`.
async fn request_reset(app: &TestApp) -> (String, String) {
    let response = app
        .server
        .post("/api/user/forget-password")
        .json(&json!({ "email": EMAIL }))
        .await;
    response.assert_status(StatusCode::OK);

    let body: Value = response.json();
    let token = body["data"]["accessToken"].as_str().unwrap().to_owned();
    let mail = app.mailer.last_to(EMAIL).expect("reset mail sent");
    let code = extract_reset_code(&mail).expect("code in mail");
    (token, code)
}

async fn reset_password(app: &TestApp, token: &str, new_password: &str) -> TestResponse {
    app.server
        .post("/api/user/reset-password")
        .json(&json!({ "token": token, "email": EMAIL, "newPassword": new_password }))
        .await
}

async fn verify(app: &TestApp, token: &str, otp: &str) -> Value {
    let response = app
        .server
        .post("/api/user/verify-otp")
        .json(&json!({ "token": token, "otp": otp }))
        .await;
    response.assert_status(StatusCode::OK);
    response.json()
}

#[tokio::test]
async fn test_reset_code_is_five_digits_and_expires() {
    let app = spawn_app();
    app.seed_account(Realm::User, EMAIL);

    let (token, code) = request_reset(&app).await;
    assert_eq!(code.len(), 5);
    assert!(code.chars().all(|c| c.is_ascii_digit()));

    let body = verify(&app, &token, &code).await;
    assert_eq!(body["success"], true);

    app.clock.advance(Duration::minutes(3) + Duration::seconds(1));
    let body = verify(&app, &token, &code).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_full_reset_changes_the_password() {
    let app = spawn_app();
    app.seed_account(Realm::User, EMAIL);

    let (token, code) = request_reset(&app).await;
    app.clock.advance(Duration::minutes(2));
    assert_eq!(verify(&app, &token, &code).await["success"], true);

    // Verifying pushed the window out to three minutes from now.
    app.clock.advance(Duration::minutes(2));
    let response = reset_password(&app, &token, "brand-new-secret").await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["data"]["user"]["email"], EMAIL);
    assert!(body["data"]["accessToken"].as_str().is_some());

    let account = app.users.find_by_email(EMAIL).await.unwrap().unwrap();
    assert_eq!(account.forget_code, None);
    assert_eq!(account.otp_expires, None);

    app.server
        .post("/api/user/login")
        .json(&json!({ "email": EMAIL, "password": TEST_PASSWORD }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .post("/api/user/login")
        .json(&json!({ "email": EMAIL, "password": "brand-new-secret" }))
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn test_reset_after_window_is_rejected() {
    let app = spawn_app();
    app.seed_account(Realm::User, EMAIL);

    let (token, code) = request_reset(&app).await;
    assert_eq!(verify(&app, &token, &code).await["success"], true);

    app.clock.advance(Duration::minutes(4));
    reset_password(&app, &token, "brand-new-secret")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_reset_without_verified_code_is_rejected() {
    let app = spawn_app();
    app.seed_account(Realm::User, EMAIL);

    app.server
        .post("/api/user/reset-password")
        .json(&json!({ "email": EMAIL, "newPassword": "brand-new-secret" }))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let (token, _) = request_reset(&app).await;
    reset_password(&app, &token, "brand-new-secret")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    app.server
        .post("/api/user/login")
        .json(&json!({ "email": EMAIL, "password": TEST_PASSWORD }))
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn test_used_token_cannot_reset_again() {
    let app = spawn_app();
    app.seed_account(Realm::User, EMAIL);

    let (token, code) = request_reset(&app).await;
    assert_eq!(verify(&app, &token, &code).await["success"], true);
    reset_password(&app, &token, "brand-new-secret")
        .await
        .assert_status(StatusCode::OK);

    app.clock.advance(Duration::minutes(5));
    assert_eq!(verify(&app, &token, &code).await["success"], false);
    let account = app.users.find_by_email(EMAIL).await.unwrap().unwrap();
    assert_eq!(account.otp_expires, None);

    reset_password(&app, &token, "hijacked-secret")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .post("/api/user/login")
        .json(&json!({ "email": EMAIL, "password": "brand-new-secret" }))
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn test_wrong_code_is_rejected() {
    let app = spawn_app();
    app.seed_account(Realm::User, EMAIL);

    let (token, code) = request_reset(&app).await;
    let wrong = if code == "00000" { "11111" } else { "00000" };
    assert_eq!(verify(&app, &token, wrong).await["success"], false);
    assert_eq!(verify(&app, &token, &code).await["success"], true);
}

#[tokio::test]
async fn test_second_request_invalidates_first_token() {
    let app = spawn_app();
    app.seed_account(Realm::User, EMAIL);

    let (first_token, _) = request_reset(&app).await;
    let (_, second_code) = request_reset(&app).await;

    assert_eq!(
        verify(&app, &first_token, &second_code).await["success"],
        false
    );
}

#[tokio::test]
async fn test_unknown_email_is_not_found() {
    let app = spawn_app();

    let response = app
        .server
        .post("/api/user/forget-password")
        .json(&json!({ "email": "nobody@example.com" }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_delivery_failure_is_bad_gateway_and_disarms() {
    let app = spawn_app();
    app.seed_account(Realm::User, EMAIL);
    app.mailer.set_failing(true);

    let response = app
        .server
        .post("/api/user/forget-password")
        .json(&json!({ "email": EMAIL }))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);

    let account = app.users.find_by_email(EMAIL).await.unwrap().unwrap();
    assert_eq!(account.forget_code, None);
    assert_eq!(account.reset_nonce, None);
}

#[tokio::test]
async fn test_admin_realm_has_its_own_reset() {
    let app = spawn_app();
    app.seed_account(Realm::Admin, "staff@example.com");

    app.server
        .post("/api/admin/forget-password")
        .json(&json!({ "email": "staff@example.com" }))
        .await
        .assert_status(StatusCode::OK);

    app.server
        .post("/api/user/forget-password")
        .json(&json!({ "email": "staff@example.com" }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
