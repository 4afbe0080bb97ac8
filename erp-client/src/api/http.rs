//! reqwest implementation of the auth API client

use async_trait::async_trait;
use erp_core::{
    AuthResponse, ErrorContext, LoginCredentials, PermissionCheckRequest,
    PermissionCheckResponse, RefreshRequest, RegisterData, SessionError, SessionResult, User,
};
use serde::de::DeserializeOwned;
use std::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use super::{create_http_client, handle_response_error, transport_error, ApiClient, ApiClientConfig};

/// HTTP client for the auth backend
pub struct HttpApiClient {
    client: reqwest::Client,
    config: ApiClientConfig,
    base_url: Url,
    auth_token: RwLock<Option<String>>,
}

impl HttpApiClient {
    /// Create a new API client
    pub fn new(config: ApiClientConfig) -> SessionResult<Self> {
        let client = create_http_client(&config)?;

        // Url::join replaces the last path segment unless the base ends with '/'
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| SessionError::Config {
            message: format!("Invalid API base URL '{}': {}", config.base_url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_api_client").with_operation("new"),
        })?;

        info!("Created API client for {}", base_url);

        Ok(Self {
            client,
            config,
            base_url,
            auth_token: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    /// Bearer token currently attached to requests
    pub fn auth_token(&self) -> Option<String> {
        self.auth_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn endpoint_url(&self, endpoint: &str) -> SessionResult<Url> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| SessionError::Config {
                message: format!("Invalid endpoint '{}': {}", endpoint, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_api_client").with_operation("endpoint_url"),
            })
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> SessionResult<reqwest::RequestBuilder> {
        let url = self.endpoint_url(endpoint)?;
        debug!("{} {}", method, url);

        let mut builder = self.client.request(method, url);
        if let Some(token) = self.auth_token() {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
        operation: &str,
    ) -> SessionResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, operation))?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, operation).await);
        }

        Ok(response)
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        operation: &str,
    ) -> SessionResult<T> {
        let response = self.execute(builder, operation).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, operation))?;

        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    fn set_auth_token(&self, token: Option<String>) {
        let mut guard = self
            .auth_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = token;
    }

    async fn login(&self, credentials: &LoginCredentials) -> SessionResult<AuthResponse> {
        let builder = self
            .request(reqwest::Method::POST, &self.config.endpoints.login)?
            .json(credentials);
        self.execute_json(builder, "login").await
    }

    async fn register(&self, data: &RegisterData) -> SessionResult<AuthResponse> {
        let builder = self
            .request(reqwest::Method::POST, &self.config.endpoints.register)?
            .json(data);
        self.execute_json(builder, "register").await
    }

    async fn refresh(&self, request: &RefreshRequest) -> SessionResult<AuthResponse> {
        let builder = self
            .request(reqwest::Method::POST, &self.config.endpoints.refresh)?
            .json(request);
        self.execute_json(builder, "refresh").await
    }

    async fn logout(&self) -> SessionResult<()> {
        let builder = self.request(reqwest::Method::POST, &self.config.endpoints.logout)?;
        self.execute(builder, "logout").await?;
        Ok(())
    }

    async fn current_user(&self) -> SessionResult<User> {
        let builder = self.request(reqwest::Method::GET, &self.config.endpoints.current_user)?;
        self.execute_json(builder, "current_user").await
    }

    async fn check_permission(
        &self,
        request: &PermissionCheckRequest,
    ) -> SessionResult<PermissionCheckResponse> {
        let builder = self
            .request(reqwest::Method::POST, &self.config.endpoints.check_permission)?
            .json(request);
        self.execute_json(builder, "check_permission").await
    }
}
