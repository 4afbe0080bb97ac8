//! API client for the ERP auth backend
//!
//! The session manager talks to the backend only through the [`ApiClient`]
//! trait; [`HttpApiClient`] is the reqwest implementation.

use async_trait::async_trait;
use erp_core::{
    ApiConfig, AuthResponse, ErrorContext, LoginCredentials, PermissionCheckRequest,
    PermissionCheckResponse, RefreshRequest, RegisterData, SessionError, SessionResult, User,
};
use std::collections::HashMap;

pub mod http;


pub use http::HttpApiClient;

/// Paths of the auth endpoints, relative to the base URL
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub login: String,
    pub register: String,
    pub refresh: String,
    pub logout: String,
    pub current_user: String,
    pub check_permission: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "auth/login".to_string(),
            register: "auth/register".to_string(),
            refresh: "auth/refresh".to_string(),
            logout: "auth/logout".to_string(),
            current_user: "auth/me".to_string(),
            check_permission: "auth/check-permission".to_string(),
        }
    }
}

/// Settings of the HTTP auth client
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Root the endpoint paths are joined onto
    pub base_url: String,
    pub timeout_seconds: u64,
    pub user_agent: String,
    /// Sent with every request, after the user agent
    pub headers: HashMap<String, String>,
    pub endpoints: AuthEndpoints,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        ApiClientConfig::from(&ApiConfig::default())
    }
}

impl From<&ApiConfig> for ApiClientConfig {
    fn from(config: &ApiConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout_seconds: config.timeout_seconds,
            user_agent: config.user_agent.clone(),
            headers: HashMap::new(),
            endpoints: AuthEndpoints::default(),
        }
    }
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_endpoints(mut self, endpoints: AuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }
}

/// Network collaborator of the session manager
///
/// Implementations keep the bearer token installed by [`ApiClient::set_auth_token`]
/// and attach it to every subsequent request.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Install or remove the bearer credential
    fn set_auth_token(&self, token: Option<String>);

    async fn login(&self, credentials: &LoginCredentials) -> SessionResult<AuthResponse>;

    async fn register(&self, data: &RegisterData) -> SessionResult<AuthResponse>;

    async fn refresh(&self, request: &RefreshRequest) -> SessionResult<AuthResponse>;

    async fn logout(&self) -> SessionResult<()>;

    async fn current_user(&self) -> SessionResult<User>;

    async fn check_permission(
        &self,
        request: &PermissionCheckRequest,
    ) -> SessionResult<PermissionCheckResponse>;
}

/// reqwest client with timeout, user agent and extra headers applied
pub(crate) fn create_http_client(config: &ApiClientConfig) -> SessionResult<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();

    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_str(&config.user_agent).map_err(|e| {
            SessionError::Config {
                message: format!("Invalid user agent: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?,
    );
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static("application/json"),
    );

    for (key, value) in &config.headers {
        let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            SessionError::Config {
                message: format!("Invalid header name '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?;

        let header_value =
            reqwest::header::HeaderValue::from_str(value).map_err(|e| SessionError::Config {
                message: format!("Invalid header value for '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            })?;

        headers.insert(header_name, header_value);
    }

    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|e| SessionError::Config {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })
}

/// Turn a non-success response into an API error, keeping the backend's message
pub(crate) async fn handle_response_error(
    response: reqwest::Response,
    operation: &str,
) -> SessionError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    SessionError::api(status, extract_error_message(&body), operation)
}

/// Pull a human readable message out of an error body
///
/// Accepts `{"message": "..."}`, `{"message": ["...", "..."]}`, `{"error": "..."}`
/// and plain text bodies.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => {
            for field in ["message", "error"] {
                match value.get(field) {
                    Some(serde_json::Value::String(message)) => return Some(message.clone()),
                    Some(serde_json::Value::Array(items)) => {
                        let parts: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
                        if !parts.is_empty() {
                            return Some(parts.join(", "));
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        Err(_) => Some(trimmed.to_string()),
    }
}

/// Map a transport failure to the error taxonomy
pub(crate) fn transport_error(error: reqwest::Error, operation: &str) -> SessionError {
    if error.is_timeout() {
        SessionError::Timeout {
            operation: operation.to_string(),
            context: ErrorContext::new("api_client").with_operation(operation),
        }
    } else if error.is_decode() {
        SessionError::Network {
            message: format!("Failed to decode response: {}", error),
            source: Some(Box::new(error)),
            context: ErrorContext::new("api_client").with_operation(operation),
        }
    } else {
        SessionError::Network {
            message: format!("Request failed: {}", error),
            source: Some(Box::new(error)),
            context: ErrorContext::new("api_client").with_operation(operation),
        }
    }
}
