use std::sync::Arc;
use std::time::Duration;

use hearth::auth::{
    LoginRequest, MemoryCredentialStore, SecretKey, SessionError, SessionEventBus, SessionManager,
};
use hearth::config::SessionConfig;
use hearth::transport::http::build_client;
use hearth::transport::{ApiRequest, AuthApi, HttpAuthApi, HttpTransport, Transport};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> reqwest::Client {
    build_client(Duration::from_secs(5)).expect("client")
}

#[tokio::test]
async fn login_posts_credentials_and_parses_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({ "email": "ada@example.com", "password": "hunter2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "access-1",
            "refreshToken": "refresh-1",
            "userRecord": { "id": 42, "email": "ada@example.com" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpAuthApi::new(client(), server.uri());
    let response = api
        .login(&LoginRequest::new("ada@example.com", "hunter2"))
        .await
        .expect("login");

    assert_eq!(response.access_token, "access-1");
    assert_eq!(response.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(response.user.unwrap()["id"], 42);
}

#[tokio::test]
async fn register_sends_display_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .and(body_json(json!({
            "email": "ada@example.com",
            "password": "hunter2",
            "displayName": "Ada"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "accessToken": "access-1",
            "refreshToken": "refresh-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpAuthApi::new(client(), server.uri());
    let response = api
        .register(&LoginRequest::new("ada@example.com", "hunter2").with_display_name("Ada"))
        .await
        .expect("register");

    assert_eq!(response.access_token, "access-1");
    assert!(response.user.is_none());
}

#[tokio::test]
async fn rejected_login_carries_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "Invalid credentials" })),
        )
        .mount(&server)
        .await;

    let api = HttpAuthApi::new(client(), server.uri());
    let err = api
        .login(&LoginRequest::new("ada@example.com", "wrong"))
        .await
        .unwrap_err();

    match err {
        SessionError::LoginFailed(message) => assert!(message.contains("Invalid credentials")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn refresh_exchange_sends_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "access-2",
            "refreshToken": "refresh-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpAuthApi::new(client(), server.uri()).with_refresh_path("/v2/auth/refresh");
    let response = api.refresh_exchange("refresh-1").await.expect("refresh");

    assert_eq!(response.access_token.as_deref(), Some("access-2"));
    assert_eq!(response.refresh_token.as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn refresh_exchange_classifies_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "revoked" })))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "garbled" })))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let api = HttpAuthApi::new(client(), server.uri());

    let err = api.refresh_exchange("revoked").await.unwrap_err();
    assert!(matches!(err, SessionError::RefreshNetworkError(ref m) if m.contains("401")));

    let err = api.refresh_exchange("garbled").await.unwrap_err();
    assert!(matches!(err, SessionError::RefreshInvalidResponse(_)));
}

#[tokio::test]
async fn transport_forwards_method_query_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/families/7"))
        .and(query_param("notify", "true"))
        .and(body_json(json!({ "name": "Lovelaces" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(client(), format!("{}/api/", server.uri()));
    let response = transport
        .send(&ApiRequest::put("/families/7?notify=true").with_json(json!({ "name": "Lovelaces" })))
        .await
        .expect("send");

    assert_eq!(response.status, 200);
    assert_eq!(response.json::<serde_json::Value>().unwrap()["id"], 7);
}

#[tokio::test]
async fn session_refreshes_and_replays_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "expired" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "email": "ada@example.com" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "fresh" })))
        .expect(1)
        .mount(&server)
        .await;

    let config = SessionConfig::builder().base_url(server.uri()).build();
    let store = Arc::new(MemoryCredentialStore::new());
    let session = SessionManager::new(
        &config,
        Arc::new(HttpAuthApi::new(client(), server.uri())),
        Arc::new(HttpTransport::new(client(), server.uri())),
        store.clone(),
        SessionEventBus::new(),
    );
    hearth::auth::store::save_credential(
        store.as_ref(),
        &hearth::auth::Credential::new("stale", Some("refresh-1".to_string())),
    )
    .await
    .unwrap();

    let me: serde_json::Value = session
        .pipeline()
        .send_json(ApiRequest::get("/me"))
        .await
        .expect("me");

    assert_eq!(me["email"], "ada@example.com");
    assert_eq!(store.peek(SecretKey::AccessToken).as_deref(), Some("fresh"));
    assert_eq!(store.peek(SecretKey::RefreshToken).as_deref(), Some("refresh-1"));
}
