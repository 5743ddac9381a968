// Integration tests for the HTTP API

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use boarddoc::api::{create_router, AppState};
use boarddoc::auth::{sign_token, Claims};
use boarddoc::cache::MemoryCache;
use boarddoc::config::OAuthConfig;
use boarddoc::credentials::{
    AuthenticationProcessor, Authentication, ProviderTokenConverter, TokenService,
};
use boarddoc::crypto::AesCipher;
use boarddoc::docserver::HttpDocServerClient;
use boarddoc::oauth::{HttpOAuthClient, OAuthClient, OAuthClientError, ProviderToken};
use boarddoc::settings::{SettingsProcessor, SettingsService};
use boarddoc::storage::{open_connection, SqliteStorage};
use chrono::Utc;
use mockito::{Matcher, Server};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const CLIENT_SECRET: &str = "client-secret";
const APPLICATION_URL: &str = "https://app.example.com/board";

const TOKEN_BODY: &str = r#"{
    "user_id": "U1",
    "team_id": "T1",
    "token_type": "bearer",
    "access_token": "provider-access",
    "refresh_token": "provider-refresh",
    "issued_at": 1700000000,
    "expires_in": 3600,
    "scope": "boards:read boards:write"
}"#;

struct TestApp {
    router: Router,
    tokens: Arc<TokenService<ProviderToken>>,
}

/// Provider that answers slower than any request timeout used here
struct StalledOAuthClient;

#[async_trait]
impl OAuthClient<ProviderToken> for StalledOAuthClient {
    async fn exchange(&self, _code: &str) -> Result<ProviderToken, OAuthClientError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(OAuthClientError::Status(503))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<ProviderToken, OAuthClientError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(OAuthClientError::Status(503))
    }
}

fn oauth_config(server: &Server) -> OAuthConfig {
    OAuthConfig {
        client_id: "client".to_string(),
        client_secret: CLIENT_SECRET.to_string(),
        redirect_uri: "https://app.example.com/oauth/install".to_string(),
        token_uri: format!("{}/token", server.url()),
        ..OAuthConfig::default()
    }
}

fn create_test_app(server: &Server) -> TestApp {
    let client = HttpOAuthClient::<ProviderToken>::new(oauth_config(server)).unwrap();
    create_test_app_with(server, Arc::new(client), Duration::from_secs(5))
}

fn create_test_app_with(
    server: &Server,
    client: Arc<dyn OAuthClient<ProviderToken>>,
    request_timeout: Duration,
) -> TestApp {
    let authorization_url = oauth_config(server).authorization_url();

    let cipher = Arc::new(AesCipher::new("test-passphrase").unwrap());
    let conn = open_connection(":memory:").unwrap();

    let tokens = Arc::new(TokenService::new(
        cipher.clone(),
        client,
        Arc::new(ProviderTokenConverter::default()),
        Arc::new(SqliteStorage::new(Arc::clone(&conn), AuthenticationProcessor).unwrap()),
    ));

    let settings = Arc::new(SettingsService::new(
        cipher,
        Arc::new(HttpDocServerClient::new(Duration::from_secs(3)).unwrap()),
        Arc::new(MemoryCache::new("test:")),
        Arc::new(SqliteStorage::new(conn, SettingsProcessor).unwrap()),
    ));

    let state = AppState {
        tokens: Arc::clone(&tokens),
        settings,
        client_secret: CLIENT_SECRET.to_string(),
        authorization_url,
        application_url: APPLICATION_URL.to_string(),
        request_timeout,
    };

    TestApp {
        router: create_router(state, &[]),
        tokens,
    }
}

fn bearer(team: &str, user: &str) -> String {
    let token = sign_token(
        &Claims {
            user: user.to_string(),
            team: team.to_string(),
            exp: Utc::now().timestamp() + 300,
        },
        CLIENT_SECRET,
    )
    .unwrap();
    format!("Bearer {}", token)
}

fn get(uri: &str, authorization: Option<String>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, authorization: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, authorization)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_of(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn expired_authentication() -> Authentication {
    Authentication {
        token_type: "bearer".to_string(),
        access_token: "old-access".to_string(),
        refresh_token: "old-refresh".to_string(),
        expires_at: Utc::now().timestamp() - 10,
        scope: "boards:read".to_string(),
    }
}

#[tokio::test]
async fn test_health() {
    let server = Server::new_async().await;
    let app = create_test_app(&server);

    let response = app.router.oneshot(get("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_install_then_authenticate() {
    let mut server = Server::new_async().await;
    let exchange = server
        .mock("POST", "/token")
        .match_query(Matcher::UrlEncoded("code".into(), "install-code".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(TOKEN_BODY)
        .create_async()
        .await;
    let app = create_test_app(&server);

    let response = app
        .router
        .clone()
        .oneshot(get("/oauth/install?code=install-code", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        APPLICATION_URL
    );
    exchange.assert_async().await;

    let response = app
        .router
        .oneshot(get("/api/authentication", Some(bearer("T1", "U1"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_of(response).await;
    assert_eq!(json["token_type"], "bearer");
    assert_eq!(json["scope"], "boards:read boards:write");
    assert!(json["expires_at"].as_i64().unwrap() > Utc::now().timestamp());
    assert!(json.get("access_token").is_none());
}

#[tokio::test]
async fn test_install_without_code() {
    let server = Server::new_async().await;
    let app = create_test_app(&server);

    let response = app.router.oneshot(get("/oauth/install", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_of(response).await;
    assert!(json["authorization_url"]
        .as_str()
        .unwrap()
        .contains("client_id=client"));
}

#[tokio::test]
async fn test_install_rejected_by_provider() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;
    let app = create_test_app(&server);

    let response = app
        .router
        .oneshot(get("/oauth/install?code=stale", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_of(response).await["authorization_url"].is_string());
}

#[tokio::test]
async fn test_authentication_requires_caller_token() {
    let server = Server::new_async().await;
    let app = create_test_app(&server);

    let response = app
        .router
        .clone()
        .oneshot(get("/api/authentication", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(json_of(response).await.get("authorization_url").is_none());

    let response = app
        .router
        .oneshot(get("/api/authentication", Some("Bearer not-a-jwt".to_string())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_authentication_requires_install() {
    let server = Server::new_async().await;
    let app = create_test_app(&server);

    let response = app
        .router
        .oneshot(get("/api/authentication", Some(bearer("T2", "U2"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(json_of(response).await["authorization_url"].is_string());
}

#[tokio::test]
async fn test_expired_token_is_refreshed() {
    let mut server = Server::new_async().await;
    let refresh = server
        .mock("POST", "/token")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "old-refresh".into()),
        ]))
        .with_status(200)
        .with_body(TOKEN_BODY)
        .expect(1)
        .create_async()
        .await;
    let app = create_test_app(&server);

    app.tokens
        .save("T1", "U1", &expired_authentication())
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(get("/api/authentication", Some(bearer("T1", "U1"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    refresh.assert_async().await;

    let refreshed = app.tokens.find("T1", "U1").await.unwrap();
    assert_eq!(refreshed.access_token, "provider-access");
}

#[tokio::test]
async fn test_rejected_refresh_requires_install() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .match_query(Matcher::Any)
        .with_status(401)
        .create_async()
        .await;
    let app = create_test_app(&server);

    app.tokens
        .save("T1", "U1", &expired_authentication())
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(get("/api/authentication", Some(bearer("T1", "U1"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(json_of(response).await["authorization_url"].is_string());
}

#[tokio::test]
async fn test_demo_settings() {
    let server = Server::new_async().await;
    let app = create_test_app(&server);
    let caller = bearer("T1", "U1");

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/settings",
            &caller,
            serde_json::json!({ "board_id": "B1", "demo": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .router
        .oneshot(get("/api/settings?board_id=B1", Some(caller.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_of(response).await;
    assert_eq!(json["demo"]["enabled"], true);
    assert_eq!(json["has_secret"], false);
}

#[tokio::test]
async fn test_settings_with_document_server() {
    let mut server = Server::new_async().await;
    let _version = server
        .mock("POST", "/command")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"error":0,"version":"8.3.0"}"#)
        .create_async()
        .await;
    let app = create_test_app(&server);
    let caller = bearer("T1", "U1");

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/settings",
            &caller,
            serde_json::json!({
                "board_id": "B1",
                "address": server.url(),
                "header": "AuthorizationJwt",
                "secret": "docserver-secret"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .router
        .oneshot(get("/api/settings?board_id=B1", Some(caller.clone())))
        .await
        .unwrap();

    let json = json_of(response).await;
    assert_eq!(json["address"], server.url());
    assert_eq!(json["header"], "AuthorizationJwt");
    assert_eq!(json["has_secret"], true);
    assert!(json.get("secret").is_none());
}

#[tokio::test]
async fn test_invalid_settings_rejected() {
    let server = Server::new_async().await;
    let app = create_test_app(&server);

    let response = app
        .router
        .oneshot(post_json(
            "/api/settings",
            &bearer("T1", "U1"),
            serde_json::json!({ "board_id": "B1", "address": "https://docs.example.com/" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_of(response).await["error"].is_string());
}

#[tokio::test]
async fn test_slow_refresh_times_out() {
    let server = Server::new_async().await;
    let app = create_test_app_with(
        &server,
        Arc::new(StalledOAuthClient),
        Duration::from_millis(50),
    );

    app.tokens
        .save("T1", "U1", &expired_authentication())
        .await
        .unwrap();
    let response = app
        .router
        .oneshot(get("/api/authentication", Some(bearer("T1", "U1"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(json_of(response).await["error"].is_string());
}
