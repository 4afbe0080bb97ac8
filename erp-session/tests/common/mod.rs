//! Common test utilities for session manager tests
//!
//! `MockApiClient` is a scripted stand-in for the auth backend: it counts
//! calls, records every bearer token pushed into it, and can hold permission
//! checks until the test releases them.

#![allow(dead_code)]

use async_trait::async_trait;
use erp_client::{ApiClient, MemoryTokenStore, StoredTokens};
use erp_core::{
    now_millis, AuthResponse, LoginCredentials, PermissionCheckRequest, PermissionCheckResponse,
    RefreshRequest, RegisterData, SessionError, SessionResult, User,
};
use erp_session::{RecordingNavigator, SessionManager, SessionOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::Semaphore;

static INIT: Once = Once::new();

/// Initialize logging for tests; set TEST_LOG to see output
pub fn init_logging() {
    INIT.call_once(|| {
        if std::env::var("TEST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_env_filter("erp_session=debug,info")
                .with_test_writer()
                .init();
        }
    });
}

pub fn user(id: &str) -> User {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "email": format!("user{}@example.com", id),
        "username": format!("user{}", id),
    }))
    .unwrap()
}

pub fn auth_response(access: &str, refresh: &str, expires_in: i64, user_id: &str) -> AuthResponse {
    AuthResponse {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_in,
        token_type: "Bearer".to_string(),
        user: user(user_id),
    }
}

#[derive(Default)]
pub struct MockApiClient {
    pub login_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    pub permission_calls: AtomicUsize,

    /// Every value passed to set_auth_token, in order
    pub auth_tokens: Mutex<Vec<Option<String>>>,
    pub refresh_requests: Mutex<Vec<RefreshRequest>>,

    pub reject_login: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub fail_me: AtomicBool,
    pub fail_logout: AtomicBool,
    pub fail_permissions: AtomicBool,
    /// Refresh number n answers with user id n instead of "1"
    pub numbered_refresh_users: AtomicBool,

    /// Permissions granted, keyed by lowercase `module:action`
    pub granted: Mutex<HashMap<String, bool>>,
    permission_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockApiClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn grant(&self, module: &str, action: &str) {
        self.granted
            .lock()
            .unwrap()
            .insert(format!("{}:{}", module, action).to_lowercase(), true);
    }

    /// Make permission checks wait until `release_permission_checks`
    pub fn hold_permission_checks(&self) {
        *self.permission_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_permission_checks(&self) {
        if let Some(gate) = self.permission_gate.lock().unwrap().as_ref() {
            gate.add_permits(1024);
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn last_auth_token(&self) -> Option<Option<String>> {
        self.auth_tokens.lock().unwrap().last().cloned()
    }

    fn next_tokens(&self) -> AuthResponse {
        let n = self.refresh_calls.load(Ordering::SeqCst) + 1;
        let user_id = if self.numbered_refresh_users.load(Ordering::SeqCst) {
            n.to_string()
        } else {
            "1".to_string()
        };
        auth_response(&format!("AT{}", n), &format!("RT{}", n), 3600, &user_id)
    }
}

#[async_trait]
impl ApiClient for MockApiClient {
    fn set_auth_token(&self, token: Option<String>) {
        self.auth_tokens.lock().unwrap().push(token);
    }

    async fn login(&self, credentials: &LoginCredentials) -> SessionResult<AuthResponse> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.reject_login.load(Ordering::SeqCst) || credentials.password != "pw" {
            return Err(SessionError::api(
                401,
                Some("Invalid email or password".to_string()),
                "login",
            ));
        }
        Ok(auth_response("AT1", "RT1", 3600, "1"))
    }

    async fn register(&self, data: &RegisterData) -> SessionResult<AuthResponse> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);

        if data.password != data.password_confirm {
            return Err(SessionError::api(
                422,
                Some("Passwords do not match".to_string()),
                "register",
            ));
        }
        Ok(auth_response("AT-new", "RT-new", 900, "42"))
    }

    async fn refresh(&self, request: &RefreshRequest) -> SessionResult<AuthResponse> {
        self.refresh_requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;

        if self.fail_refresh.load(Ordering::SeqCst) {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            return Err(SessionError::api(401, None, "refresh"));
        }
        let response = self.next_tokens();
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(response)
    }

    async fn logout(&self) -> SessionResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(SessionError::Network {
                message: "connection reset".to_string(),
                source: None,
                context: erp_core::ErrorContext::new("mock"),
            });
        }
        Ok(())
    }

    async fn current_user(&self) -> SessionResult<User> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_me.load(Ordering::SeqCst) {
            return Err(SessionError::api(401, None, "current_user"));
        }
        Ok(user("1"))
    }

    async fn check_permission(
        &self,
        request: &PermissionCheckRequest,
    ) -> SessionResult<PermissionCheckResponse> {
        self.permission_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.permission_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.unwrap();
            permit.forget();
        }

        if self.fail_permissions.load(Ordering::SeqCst) {
            return Err(SessionError::api(500, None, "check_permission"));
        }

        let key = format!("{}:{}", request.module, request.action).to_lowercase();
        let allowed = self.granted.lock().unwrap().get(&key).copied().unwrap_or(false);
        Ok(PermissionCheckResponse { allowed })
    }
}

pub struct TestSession {
    pub manager: SessionManager,
    pub api: Arc<MockApiClient>,
    pub store: Arc<MemoryTokenStore>,
    pub navigator: Arc<RecordingNavigator>,
}

impl TestSession {
    pub fn new() -> Self {
        Self::with_store(MemoryTokenStore::new(), SessionOptions::default())
    }

    pub fn with_store(store: MemoryTokenStore, options: SessionOptions) -> Self {
        init_logging();

        let api = MockApiClient::new();
        let store = Arc::new(store);
        let navigator = Arc::new(RecordingNavigator::new());

        let manager = SessionManager::builder(api.clone())
            .with_store(store.clone())
            .with_navigator(navigator.clone())
            .with_options(options)
            .build();

        Self {
            manager,
            api,
            store,
            navigator,
        }
    }

    /// Session whose persisted access token expires `expires_in` from now
    pub fn with_stored_tokens(expires_in: Duration, options: SessionOptions) -> Self {
        let expires_at = now_millis() + expires_in.as_millis() as i64;
        let store = MemoryTokenStore::with_tokens(&StoredTokens::new(
            "AT0".to_string(),
            "RT0".to_string(),
            expires_at,
        ));
        Self::with_store(store, options)
    }
}

/// Wait until `counter` reaches `target`, failing after a second
pub async fn wait_for(counter: &AtomicUsize, target: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) >= target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "counter stuck at {} waiting for {}",
        counter.load(Ordering::SeqCst),
        target
    );
}
