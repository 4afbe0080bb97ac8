//! Session Manager - owner of the client's authenticated session
//!
//! Holds the token pair, the current user and the permission cache, mediates
//! every credential-dependent call, and keeps the access token fresh while
//! the session is authenticated.

use crate::navigation::{Navigator, NoopNavigator};
use crate::permissions::PermissionCache;
use crate::renewal::{renewal_due, RenewalOutcome, RenewalTask};
use crate::state::{SessionSnapshot, SessionState, TokenPair};
use erp_client::{ApiClient, MemoryTokenStore, StoredTokens, TokenStore};
use erp_core::{
    log_operation_error, log_operation_start, log_operation_success, now_millis, AuthResponse,
    ErrorContext, LoginCredentials, PermissionCheckRequest, PermissionKey, RefreshRequest,
    RegisterData, SessionError, SessionResult, SessionSettings, SessionStatus, User,
};
use futures::future::{join_all, FutureExt};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Timing and routing options of the session manager
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub renewal_check_interval: Duration,
    pub renewal_lead_time: Duration,
    pub landing_route: String,
    pub login_route: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions::from(&SessionSettings::default())
    }
}

impl From<&SessionSettings> for SessionOptions {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            renewal_check_interval: Duration::from_secs(settings.renewal_check_interval_secs),
            renewal_lead_time: Duration::from_secs(settings.renewal_lead_time_secs),
            landing_route: settings.landing_route.clone(),
            login_route: settings.login_route.clone(),
        }
    }
}

struct Inner {
    api: Arc<dyn ApiClient>,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    options: SessionOptions,
    state: RwLock<SessionState>,
    permissions: PermissionCache,
    /// Serializes every operation that replaces or clears the token set
    mutation_lock: tokio::sync::Mutex<()>,
    status_tx: watch::Sender<SessionStatus>,
    renewal: Mutex<Option<RenewalTask>>,
}

/// Handle to the single client session; clones share the same session
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        api: Arc<dyn ApiClient>,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        options: SessionOptions,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Uninitialized);

        Self {
            inner: Arc::new(Inner {
                api,
                store,
                navigator,
                options,
                state: RwLock::new(SessionState::default()),
                permissions: PermissionCache::new(),
                mutation_lock: tokio::sync::Mutex::new(()),
                status_tx,
                renewal: Mutex::new(None),
            }),
        }
    }

    pub fn builder(api: Arc<dyn ApiClient>) -> SessionManagerBuilder {
        SessionManagerBuilder::new(api)
    }

    /// Restore a persisted session; never fails, degrades to anonymous
    ///
    /// Only the first call does any work; later calls return the current status.
    pub async fn initialize(&self) -> SessionStatus {
        let _guard = self.inner.mutation_lock.lock().await;

        let status = self.status();
        if status != SessionStatus::Uninitialized {
            debug!(status = %status, "Session already initialized");
            return status;
        }

        log_operation_start!("initialize");
        self.set_status(SessionStatus::Initializing);

        let stored = match self.inner.store.load() {
            Ok(stored) => stored,
            Err(e) => {
                e.log();
                None
            }
        };

        let Some(stored) = stored else {
            self.clear_session();
            info!("No stored session, starting anonymous");
            return SessionStatus::Anonymous;
        };

        let expired = stored.is_expired(now_millis());
        self.install_tokens(TokenPair::from(stored));

        let result = if expired {
            debug!("Stored access token expired, refreshing");
            self.refresh_locked().await.map(|_| ())
        } else {
            self.fetch_user_locked().await.map(|_| ())
        };

        match result {
            Ok(()) => {
                log_operation_success!("initialize", user_id = ?self.current_user().map(|u| u.id));
            }
            Err(e) => {
                // refresh_locked / fetch_user_locked already cleared the session
                log_operation_error!("initialize", e);
            }
        }

        self.status()
    }

    /// Authenticate with email and password
    ///
    /// On failure the error is returned unchanged and the session is untouched.
    pub async fn login(&self, credentials: &LoginCredentials) -> SessionResult<User> {
        log_operation_start!("login", email = %credentials.email);
        let _guard = self.inner.mutation_lock.lock().await;

        let response = match self.inner.api.login(credentials).await {
            Ok(response) => response,
            Err(e) => {
                log_operation_error!("login", e, email = %credentials.email);
                return Err(e);
            }
        };

        let user = self.apply_auth_response(response);
        self.inner.navigator.navigate(&self.inner.options.landing_route);

        log_operation_success!("login", user_id = %user.id);
        Ok(user)
    }

    /// Create an account; the backend answers with a full token set
    pub async fn register(&self, data: &RegisterData) -> SessionResult<User> {
        log_operation_start!("register", email = %data.email);
        let _guard = self.inner.mutation_lock.lock().await;

        let response = match self.inner.api.register(data).await {
            Ok(response) => response,
            Err(e) => {
                log_operation_error!("register", e, email = %data.email);
                return Err(e);
            }
        };

        let user = self.apply_auth_response(response);
        self.inner.navigator.navigate(&self.inner.options.landing_route);

        log_operation_success!("register", user_id = %user.id);
        Ok(user)
    }

    /// End the session; remote failures are logged, local state always clears
    pub async fn logout(&self) {
        log_operation_start!("logout");
        let _guard = self.inner.mutation_lock.lock().await;

        if self.read_state(|state| state.tokens.is_some()) {
            if let Err(e) = self.inner.api.logout().await {
                log_operation_error!("logout", e);
            }
        } else {
            debug!("No active session, skipping remote logout");
        }

        self.clear_session();
        self.inner.navigator.navigate(&self.inner.options.login_route);
        log_operation_success!("logout");
    }

    /// Rotate the token pair
    ///
    /// Any failure from the backend ends the session before the error is returned.
    pub async fn refresh_access_token(&self) -> SessionResult<User> {
        let _guard = self.inner.mutation_lock.lock().await;
        self.refresh_locked().await
    }

    /// Re-read the current user from the backend
    pub async fn fetch_user_data(&self) -> SessionResult<User> {
        let _guard = self.inner.mutation_lock.lock().await;
        self.fetch_user_locked().await
    }

    /// Whether the current user may perform `action` on `module`
    ///
    /// Concurrent checks for the same pair share one request. Failures deny.
    pub async fn check_permission(&self, module: &str, action: &str) -> bool {
        let key = PermissionKey::new(module, action);
        let api = Arc::clone(&self.inner.api);
        let request = PermissionCheckRequest {
            module: module.to_string(),
            action: action.to_string(),
        };

        let outcome = self.inner.permissions.get_or_insert_with(key.clone(), move || {
            async move {
                match api.check_permission(&request).await {
                    Ok(response) => response.allowed,
                    Err(e) => {
                        warn!(
                            module = %request.module,
                            action = %request.action,
                            error = %e,
                            "Permission check failed, denying"
                        );
                        false
                    }
                }
            }
            .boxed()
        });

        let allowed = outcome.await;
        debug!(key = %key, allowed = allowed, "Permission resolved");
        allowed
    }

    /// True only if every listed permission is granted
    pub async fn check_permissions(&self, checks: &[(&str, &str)]) -> bool {
        join_all(
            checks
                .iter()
                .map(|(module, action)| self.check_permission(module, action)),
        )
        .await
        .into_iter()
        .all(|allowed| allowed)
    }

    /// One pass of the background renewal check
    pub async fn renew_if_due(&self) -> RenewalOutcome {
        let _guard = self.inner.mutation_lock.lock().await;

        let expires_at_ms = self.read_state(|state| match (&state.current_user, &state.tokens) {
            (Some(_), Some(tokens)) => Some(tokens.expires_at_ms),
            _ => None,
        });

        let Some(expires_at_ms) = expires_at_ms else {
            return RenewalOutcome::NoSession;
        };

        if !renewal_due(expires_at_ms, now_millis(), self.inner.options.renewal_lead_time) {
            return RenewalOutcome::NotDue;
        }

        info!(
            expires_in_ms = expires_at_ms - now_millis(),
            "Access token close to expiry, renewing"
        );

        match self.refresh_locked().await {
            Ok(_) => RenewalOutcome::Refreshed,
            Err(e) => {
                warn!(error = %e, "Background token renewal failed");
                RenewalOutcome::Failed
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status_tx.borrow()
    }

    /// Receiver notified on every status transition
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    pub fn current_user(&self) -> Option<User> {
        self.read_state(|state| state.current_user.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_state(|state| state.tokens.as_ref().map(|t| t.access_token.clone()))
    }

    pub fn expires_at_ms(&self) -> Option<i64> {
        self.read_state(|state| state.tokens.as_ref().map(|t| t.expires_at_ms))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let status = self.status();
        let cached = self.inner.permissions.len();
        self.read_state(|state| SessionSnapshot::new(state, status, cached))
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    async fn refresh_locked(&self) -> SessionResult<User> {
        let Some(tokens) = self.read_state(|state| state.tokens.clone()) else {
            return Err(SessionError::NoRefreshToken {
                context: ErrorContext::new("session_manager").with_operation("refresh"),
            });
        };

        log_operation_start!("refresh");
        let request = RefreshRequest {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        };

        match self.inner.api.refresh(&request).await {
            Ok(response) => {
                let user = self.apply_auth_response(response);
                log_operation_success!("refresh", user_id = %user.id);
                Ok(user)
            }
            Err(e) => {
                log_operation_error!("refresh", e);
                self.clear_session();
                Err(e)
            }
        }
    }

    async fn fetch_user_locked(&self) -> SessionResult<User> {
        if self.read_state(|state| state.tokens.is_none()) {
            return Err(SessionError::session_invalid(
                "No active session",
                "fetch_user_data",
            ));
        }

        match self.inner.api.current_user().await {
            Ok(user) => {
                self.write_state(|state| state.current_user = Some(user.clone()));
                self.inner.permissions.clear();
                self.enter_authenticated();
                debug!(user_id = %user.id, "User data refreshed");
                Ok(user)
            }
            Err(e) => {
                log_operation_error!("fetch_user_data", e);
                self.clear_session();
                Err(e)
            }
        }
    }

    /// Store a freshly issued token set and its user
    fn apply_auth_response(&self, response: AuthResponse) -> User {
        let expires_at_ms = response.expires_at_ms(now_millis());
        let tokens = TokenPair {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at_ms,
        };

        if let Err(e) = self.inner.store.save(&StoredTokens::from(&tokens)) {
            e.log();
        }

        // Readers never observe the new tokens next to the previous user
        let user = response.user;
        self.inner.api.set_auth_token(Some(tokens.access_token.clone()));
        self.write_state(|state| {
            state.tokens = Some(tokens);
            state.current_user = Some(user.clone());
        });
        self.inner.permissions.clear();
        self.enter_authenticated();
        user
    }

    /// Put a token pair in memory and on the HTTP client
    fn install_tokens(&self, tokens: TokenPair) {
        self.inner.api.set_auth_token(Some(tokens.access_token.clone()));
        self.write_state(|state| state.tokens = Some(tokens));
    }

    /// Drop everything and become anonymous
    fn clear_session(&self) {
        self.write_state(|state| *state = SessionState::default());
        self.inner.api.set_auth_token(None);

        if let Err(e) = self.inner.store.clear() {
            e.log();
        }

        let dropped = self.inner.permissions.clear();
        if dropped > 0 {
            debug!(entries = dropped, "Permission cache cleared");
        }

        self.stop_renewal();
        self.set_status(SessionStatus::Anonymous);
    }

    fn enter_authenticated(&self) {
        self.set_status(SessionStatus::Authenticated);
        self.start_renewal();
    }

    fn start_renewal(&self) {
        let mut slot = self
            .inner
            .renewal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *slot = Some(RenewalTask::spawn(
            self.inner.options.renewal_check_interval,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => {
                            SessionManager { inner }.renew_if_due().await;
                            true
                        }
                        None => false,
                    }
                }
                .boxed()
            },
        ));
    }

    fn stop_renewal(&self) {
        let task = self
            .inner
            .renewal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(task) = task {
            task.stop();
        }
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = self.inner.status_tx.send_replace(status);
        if previous != status {
            info!(from = %previous, to = %status, "Session status changed");
        }
    }

    fn read_state<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self
            .inner
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&state)
    }

    fn write_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status())
            .field("user_id", &self.current_user().map(|u| u.id))
            .field("permissions", &self.inner.permissions)
            .finish()
    }
}

/// Builder for creating session managers
pub struct SessionManagerBuilder {
    api: Arc<dyn ApiClient>,
    store: Option<Arc<dyn TokenStore>>,
    navigator: Option<Arc<dyn Navigator>>,
    options: SessionOptions,
}

impl SessionManagerBuilder {
    pub fn new(api: Arc<dyn ApiClient>) -> Self {
        Self {
            api,
            store: None,
            navigator: None,
            options: SessionOptions::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the manager; defaults to an in-memory store and a no-op navigator
    pub fn build(self) -> SessionManager {
        SessionManager::new(
            self.api,
            self.store
                .unwrap_or_else(|| Arc::new(MemoryTokenStore::new())),
            self.navigator.unwrap_or_else(|| Arc::new(NoopNavigator)),
            self.options,
        )
    }
}
