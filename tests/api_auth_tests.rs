//! 认证 API 集成测试

use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::{create_test_app, json_request, login, login_tokens, register_user, send};

#[tokio::test]
async fn test_register_login_and_refresh_flow() {
    let (app, _state) = create_test_app();

    let user = register_user(&app, "alice", "alice@x.com", "pw123456").await;
    assert_eq!(user["username"], "alice");
    assert_eq!(user["role"], "user");
    assert_eq!(user["status"], "active");
    assert!(user.get("password_hash").is_none());

    let (status, json) = login(&app, "alice", "pw123456").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["token_type"], "Bearer");
    assert_eq!(json["expires_in"], 300);
    assert_eq!(json["user"]["username"], "alice");
    let access = json["access_token"].as_str().unwrap().to_string();
    let refresh = json["refresh_token"].as_str().unwrap().to_string();

    let (status, me) =
        send(&app, json_request("GET", "/api/v1/users/me", Some(&access), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "alice@x.com");

    let (status, refreshed) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["token_type"], "Bearer");
    assert!(refreshed.get("refresh_token").is_none());

    let new_access = refreshed["access_token"].as_str().unwrap();
    let (status, _) =
        send(&app, json_request("GET", "/api/v1/users/me", Some(new_access), None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_login_by_email() {
    let (app, _state) = create_test_app();
    register_user(&app, "alice", "alice@x.com", "pw123456").await;

    let (status, json) = login(&app, "alice@x.com", "pw123456").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["username"], "alice");
}

#[tokio::test]
async fn test_login_failures_look_identical() {
    let (app, _state) = create_test_app();
    register_user(&app, "realuser", "real@x.com", "pw123456").await;

    let (missing_status, missing) = login(&app, "nonexistent-user", "anything").await;
    let (wrong_status, wrong) = login(&app, "realuser", "wrongpassword").await;

    assert_eq!(missing_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing["error"]["code"], wrong["error"]["code"]);
    assert_eq!(missing["error"]["kind"], wrong["error"]["kind"]);
    assert_eq!(missing["error"]["message"], wrong["error"]["message"]);
}

#[tokio::test]
async fn test_register_conflicts_and_validation() {
    let (app, _state) = create_test_app();
    register_user(&app, "alice", "alice@x.com", "pw123456").await;

    let body = json!({
        "username": "alice",
        "email": "new@x.com",
        "password": "pw123456",
        "confirm_password": "pw123456",
    });
    let (status, json) =
        send(&app, json_request("POST", "/api/v1/auth/register", None, Some(body))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["kind"], "username_exists");

    let body = json!({
        "username": "bob",
        "email": "alice@x.com",
        "password": "pw123456",
        "confirm_password": "pw123456",
    });
    let (status, json) =
        send(&app, json_request("POST", "/api/v1/auth/register", None, Some(body))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["kind"], "email_already_used");

    let body = json!({
        "username": "bob",
        "email": "bob@x.com",
        "password": "pw123456",
        "confirm_password": "different1",
    });
    let (status, json) =
        send(&app, json_request("POST", "/api/v1/auth/register", None, Some(body))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "validation");
}

#[tokio::test]
async fn test_missing_and_malformed_authorization() {
    let (app, _state) = create_test_app();

    let (status, json) = send(&app, json_request("GET", "/api/v1/users/me", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["kind"], "token_not_found");

    let request = axum::http::Request::builder()
        .uri("/api/v1/users/me")
        .header("authorization", "Token abc")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["kind"], "token_malformed");

    let (status, json) =
        send(&app, json_request("GET", "/api/v1/users/me", Some("not.a.jwt"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["kind"], "token_malformed");
}

#[tokio::test]
async fn test_token_kinds_are_not_interchangeable() {
    let (app, _state) = create_test_app();
    register_user(&app, "alice", "alice@x.com", "pw123456").await;
    let (access, refresh) = login_tokens(&app, "alice", "pw123456").await;

    // 刷新令牌不能访问受保护资源
    let (status, json) =
        send(&app, json_request("GET", "/api/v1/users/me", Some(&refresh), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["kind"], "token_invalid");

    // 访问令牌不能用于刷新
    let (status, json) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": access })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["kind"], "token_invalid");
}

#[tokio::test]
async fn test_token_signed_with_other_secret_rejected() {
    let (app, _state) = create_test_app();
    register_user(&app, "alice", "alice@x.com", "pw123456").await;

    let mut other_config = common::create_test_config();
    other_config.security.jwt_secret =
        secrecy::Secret::new("another-secret-key-that-is-long-enough-123".to_string());
    let (other_app, _) = {
        let state = common::create_test_app_state_with(other_config);
        (user_api::routes::create_router(state.clone()), state)
    };
    register_user(&other_app, "alice", "alice@x.com", "pw123456").await;
    let (foreign_access, _) = login_tokens(&other_app, "alice", "pw123456").await;

    let (status, json) =
        send(&app, json_request("GET", "/api/v1/users/me", Some(&foreign_access), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["kind"], "token_invalid_signature");
}

#[tokio::test]
async fn test_change_password_over_http() {
    let (app, _state) = create_test_app();
    register_user(&app, "alice", "alice@x.com", "pw123456").await;
    let (access, _) = login_tokens(&app, "alice", "pw123456").await;

    let body = json!({
        "old_password": "wrongold",
        "new_password": "newpass99",
        "confirm_password": "newpass99",
    });
    let (status, json) = send(
        &app,
        json_request("PUT", "/api/v1/users/me/password", Some(&access), Some(body)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["kind"], "invalid_password");

    let body = json!({
        "old_password": "pw123456",
        "new_password": "newpass99",
        "confirm_password": "newpass99",
    });
    let (status, _) = send(
        &app,
        json_request("PUT", "/api/v1/users/me/password", Some(&access), Some(body)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = login(&app, "alice", "pw123456").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = login(&app, "alice", "newpass99").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_login_records_forwarded_client_ip() {
    let (app, state) = create_test_app();
    let user = register_user(&app, "alice", "alice@x.com", "pw123456").await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(axum::body::Body::from(
            json!({ "username": "alice", "password": "pw123456" }).to_string(),
        ))
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["last_login_ip"], "203.0.113.7");

    let id = user["id"].as_str().unwrap().parse().unwrap();
    let stored = state.accounts.get_profile(id).await.unwrap();
    assert_eq!(stored.last_login_ip.as_deref(), Some("203.0.113.7"));
}

#[tokio::test]
async fn test_concurrent_logins_are_independent() {
    let (app, _state) = create_test_app();
    register_user(&app, "alice", "alice@x.com", "pw123456").await;

    let attempts = (0..8).map(|_| login(&app, "alice", "pw123456"));
    let results = futures::future::join_all(attempts).await;

    let mut tokens = Vec::new();
    for (status, json) in results {
        assert_eq!(status, StatusCode::OK);
        tokens.push(json["access_token"].as_str().unwrap().to_string());
    }

    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens.len(), 8);
}

#[tokio::test]
async fn test_unparseable_body_gets_error_envelope() {
    let (app, _state) = create_test_app();

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "bad_request");
    assert_eq!(json["error"]["code"], 10001);
    let message = json["error"]["message"].as_str().unwrap();
    assert!(!message.contains("line 1"));

    // 缺少 content-type
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .body(axum::body::Body::from(r#"{"username":"a","password":"b"}"#))
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "bad_request");

    // 字段类型不符
    let body = json!({ "username": 42, "password": "pw123456" });
    let (status, json) =
        send(&app, json_request("POST", "/api/v1/auth/login", None, Some(body))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "bad_request");
}

#[tokio::test]
async fn test_error_body_carries_request_id_header() {
    let (app, _state) = create_test_app();

    let request = axum::http::Request::builder()
        .uri("/api/v1/users/me")
        .header("x-request-id", "req-abc-123")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-request-id"], "req-abc-123");

    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"]["request_id"], "req-abc-123");
}
