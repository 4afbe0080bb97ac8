//! Integration tests for the HTTP API client
//!
//! A throwaway axum backend stands in for the ERP auth API.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use erp_client::{ApiClient, ApiClientConfig, AuthEndpoints, HttpApiClient};
use erp_core::{
    LoginCredentials, PermissionCheckRequest, RefreshRequest, RegisterData, SessionError,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Backend {
    seen_auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    register_bodies: Arc<Mutex<Vec<Value>>>,
}

impl Backend {
    fn record(&self, headers: &HeaderMap) {
        let value = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        self.seen_auth_headers.lock().unwrap().push(value);
    }
}

fn token_payload(access: &str, refresh: &str) -> Value {
    json!({
        "accessToken": access,
        "refreshToken": refresh,
        "expiresIn": 3600,
        "tokenType": "Bearer",
        "user": { "id": "1", "email": "a@b.com", "username": "alice", "roles": ["admin"] }
    })
}

async fn login(Json(body): Json<Value>) -> impl IntoResponse {
    if body["email"] == "a@b.com" && body["password"] == "pw" {
        (StatusCode::OK, Json(token_payload("AT1", "RT1")))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Invalid email or password", "statusCode": 401 })),
        )
    }
}

async fn refresh(Json(body): Json<Value>) -> impl IntoResponse {
    if body["refreshToken"] == "RT1" && body["accessToken"] == "AT1" {
        (StatusCode::OK, Json(token_payload("AT2", "RT2")))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "statusCode": 401 })))
    }
}

async fn register(State(backend): State<Backend>, Json(body): Json<Value>) -> impl IntoResponse {
    backend.register_bodies.lock().unwrap().push(body.clone());
    if body["password"] != body["passwordConfirm"] {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "message": ["Passwords do not match", "password too short"] })),
        );
    }
    (StatusCode::CREATED, Json(token_payload("AT-new", "RT-new")))
}

async fn me(State(backend): State<Backend>, headers: HeaderMap) -> impl IntoResponse {
    backend.record(&headers);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer AT1") => (
            StatusCode::OK,
            Json(json!({ "id": "1", "email": "a@b.com", "username": "alice" })),
        ),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))),
    }
}

async fn check_permission(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "allowed": body["module"] == "orders" && body["action"] == "create" }))
}

async fn logout() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn broken() -> &'static str {
    "this is not json"
}

async fn create_test_server() -> (String, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/me", get(me))
        .route("/api/auth/check-permission", post(check_permission))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/register", post(register))
        .route("/api/broken", get(broken))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/api", addr), backend)
}

fn client_for(base_url: &str) -> HttpApiClient {
    HttpApiClient::new(ApiClientConfig::new(base_url).with_timeout(5)).unwrap()
}

#[tokio::test]
async fn test_login_success_and_failure() {
    let (base_url, _backend) = create_test_server().await;
    let client = client_for(&base_url);

    let response = client
        .login(&LoginCredentials::new("a@b.com", "pw"))
        .await
        .unwrap();
    assert_eq!(response.access_token, "AT1");
    assert_eq!(response.refresh_token, "RT1");
    assert_eq!(response.expires_in, 3600);
    assert_eq!(response.user.id, "1");
    assert!(response.user.has_role("admin"));

    let error = client
        .login(&LoginCredentials::new("a@b.com", "wrong"))
        .await
        .unwrap_err();
    assert_eq!(error.status(), Some(401));
    assert!(error.is_credential_error());
    assert_eq!(error.to_string(), "API error (401): Invalid email or password");
}

#[tokio::test]
async fn test_bearer_token_follows_set_auth_token() {
    let (base_url, backend) = create_test_server().await;
    let client = client_for(&base_url);

    let error = client.current_user().await.unwrap_err();
    assert_eq!(error.status(), Some(401));
    assert_eq!(error.to_string(), "API error (401): Unauthorized");

    client.set_auth_token(Some("AT1".to_string()));
    let user = client.current_user().await.unwrap();
    assert_eq!(user.username, "alice");

    client.set_auth_token(None);
    assert!(client.current_user().await.is_err());

    let seen = backend.seen_auth_headers.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![None, Some("Bearer AT1".to_string()), None]
    );
}

#[tokio::test]
async fn test_refresh_rotates_tokens() {
    let (base_url, _backend) = create_test_server().await;
    let client = client_for(&base_url);

    let response = client
        .refresh(&RefreshRequest {
            access_token: "AT1".to_string(),
            refresh_token: "RT1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.access_token, "AT2");
    assert_eq!(response.refresh_token, "RT2");

    let error = client
        .refresh(&RefreshRequest {
            access_token: "AT2".to_string(),
            refresh_token: "stale".to_string(),
        })
        .await
        .unwrap_err();
    // No body message: falls back to the status class text
    assert_eq!(
        error.to_string(),
        "API error (401): Authentication required or credentials rejected"
    );
    assert!(error.is_session_invalid());
}

#[tokio::test]
async fn test_register_sends_camel_case_body() {
    let (base_url, backend) = create_test_server().await;
    let client = client_for(&base_url);

    let data = RegisterData {
        email: "new@example.com".to_string(),
        username: "newbie".to_string(),
        password: "secret".to_string(),
        password_confirm: "secret".to_string(),
        first_name: Some("New".to_string()),
        last_name: None,
    };
    let response = client.register(&data).await.unwrap();
    assert_eq!(response.access_token, "AT-new");
    assert_eq!(response.refresh_token, "RT-new");

    let mismatch = RegisterData {
        password_confirm: "other".to_string(),
        ..data
    };
    let error = client.register(&mismatch).await.unwrap_err();
    assert!(matches!(error, SessionError::Api { status: 422, .. }));
    assert!(error.is_credential_error());
    assert_eq!(
        error.to_string(),
        "API error (422): Passwords do not match, password too short"
    );

    let bodies = backend.register_bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["passwordConfirm"], "secret");
    assert_eq!(bodies[0]["firstName"], "New");
    assert!(bodies[0].get("lastName").is_none());
    assert!(bodies[0].get("password_confirm").is_none());
}

#[tokio::test]
async fn test_permission_check_and_logout() {
    let (base_url, _backend) = create_test_server().await;
    let client = client_for(&base_url);

    let allowed = client
        .check_permission(&PermissionCheckRequest {
            module: "orders".to_string(),
            action: "create".to_string(),
        })
        .await
        .unwrap();
    assert!(allowed.allowed);

    let denied = client
        .check_permission(&PermissionCheckRequest {
            module: "users".to_string(),
            action: "delete".to_string(),
        })
        .await
        .unwrap();
    assert!(!denied.allowed);

    assert!(client.logout().await.is_ok());
}

#[tokio::test]
async fn test_undecodable_body_is_serialization_error() {
    let (base_url, _backend) = create_test_server().await;

    let client = HttpApiClient::new(
        ApiClientConfig::new(&base_url).with_endpoints(AuthEndpoints {
            current_user: "broken".to_string(),
            ..AuthEndpoints::default()
        }),
    )
    .unwrap();

    let error = client.current_user().await.unwrap_err();
    assert!(matches!(error, SessionError::Serialization(_)));
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(&format!("http://{}/api", addr));
    let error = client
        .login(&LoginCredentials::new("a@b.com", "pw"))
        .await
        .unwrap_err();

    assert!(matches!(error, SessionError::Network { .. }));
    assert!(error.is_recoverable());
}
